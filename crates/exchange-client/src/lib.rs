use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use engine_core::{retry_transient, Candle, EngineError, OrderFill, OrderPlacer, OrderSide, PriceSource};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Binance-shaped spot REST client. Read endpoints (`/api/v3/ticker/price`,
/// `/api/v3/klines`) are unauthenticated; `place_order` signs the query with
/// HMAC-SHA256 the way a Binance-style order submission does, unless
/// `paper_trading` is set, in which case it never calls the order endpoint
/// at all and instead synthesizes a fill (§6: "paper mode returns a
/// simulated fill at the current price with `order_id` prefixed `PAPER_`").
pub struct HttpExchangeClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    paper_trading: bool,
}

impl HttpExchangeClient {
    pub fn new(base_url: impl Into<String>, api_key: String, api_secret: String, paper_trading: bool, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.into(),
            api_key,
            api_secret,
            paper_trading,
        }
    }

    fn sign(&self, query: &str) -> Result<String, EngineError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| EngineError::PermanentIo {
            component: "exchange".into(),
            message: format!("invalid API secret: {e}"),
        })?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn classify(component: &str, err: reqwest::Error) -> EngineError {
        if err.is_timeout() || err.is_connect() {
            EngineError::TransientIo { component: component.to_string(), message: err.to_string() }
        } else {
            EngineError::PermanentIo { component: component.to_string(), message: err.to_string() }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: Decimal,
}

#[async_trait]
impl PriceSource for HttpExchangeClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, EngineError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let symbol = symbol.to_string();
        retry_transient("exchange.get_price", || {
            let url = url.clone();
            let symbol = symbol.clone();
            async move {
                let resp = self
                    .client
                    .get(&url)
                    .query(&[("symbol", symbol.as_str())])
                    .send()
                    .await
                    .map_err(|e| Self::classify("exchange", e))?;
                let ticker: TickerPrice = resp.json().await.map_err(|e| EngineError::ParseFailure {
                    component: "exchange".into(),
                    message: e.to_string(),
                })?;
                Ok(ticker.price)
            }
        })
        .await
    }

    async fn get_all_prices(&self) -> Result<HashMap<String, Decimal>, EngineError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        retry_transient("exchange.get_all_prices", || {
            let url = url.clone();
            async move {
                let resp = self.client.get(&url).send().await.map_err(|e| Self::classify("exchange", e))?;
                let tickers: Vec<TickerPrice> = resp.json().await.map_err(|e| EngineError::ParseFailure {
                    component: "exchange".into(),
                    message: e.to_string(),
                })?;
                Ok(tickers.into_iter().map(|t| (t.symbol, t.price)).collect())
            }
        })
        .await
    }

    async fn get_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, EngineError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let symbol = symbol.to_string();
        let interval = interval.to_string();
        retry_transient("exchange.get_candles", || {
            let url = url.clone();
            let symbol = symbol.clone();
            let interval = interval.clone();
            async move {
                let resp = self
                    .client
                    .get(&url)
                    .query(&[
                        ("symbol", symbol.as_str()),
                        ("interval", interval.as_str()),
                        ("limit", &limit.to_string()),
                    ])
                    .send()
                    .await
                    .map_err(|e| Self::classify("exchange", e))?;
                let raw: Vec<Vec<serde_json::Value>> = resp.json().await.map_err(|e| EngineError::ParseFailure {
                    component: "exchange".into(),
                    message: e.to_string(),
                })?;
                raw.into_iter().map(parse_kline).collect()
            }
        })
        .await
    }
}

fn parse_kline(row: Vec<serde_json::Value>) -> Result<Candle, EngineError> {
    let fail = || EngineError::ParseFailure { component: "exchange".into(), message: "malformed kline row".into() };
    let open_time_ms = row.first().and_then(|v| v.as_i64()).ok_or_else(fail)?;
    let open = parse_decimal(&row, 1)?;
    let high = parse_decimal(&row, 2)?;
    let low = parse_decimal(&row, 3)?;
    let close = parse_decimal(&row, 4)?;
    let volume = parse_decimal(&row, 5)?;
    let open_time: DateTime<Utc> = Utc.timestamp_millis_opt(open_time_ms).single().ok_or_else(fail)?;
    Ok(Candle { open_time, open, high, low, close, volume })
}

fn parse_decimal(row: &[serde_json::Value], idx: usize) -> Result<Decimal, EngineError> {
    row.get(idx)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::ParseFailure { component: "exchange".into(), message: "malformed kline field".into() })
}

#[async_trait]
impl OrderPlacer for HttpExchangeClient {
    async fn place_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<OrderFill, EngineError> {
        if self.paper_trading {
            let price = self.get_price(symbol).await?;
            return Ok(OrderFill {
                price,
                executed_qty: quantity,
                cum_quote_qty: price * quantity,
                order_id: format!("PAPER_{}", Uuid::new_v4()),
            });
        }

        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let timestamp = Utc::now().timestamp_millis();
        let query = format!(
            "symbol={symbol}&side={side_str}&type=MARKET&quantity={quantity}&timestamp={timestamp}"
        );
        let signature = self.sign(&query)?;
        let url = format!("{}/api/v3/order?{query}&signature={signature}", self.base_url);

        retry_transient("exchange.place_order", || {
            let url = url.clone();
            async move {
                let resp = self
                    .client
                    .post(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .map_err(|e| Self::classify("exchange", e))?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EngineError::PermanentIo {
                        component: "exchange".into(),
                        message: format!("order rejected ({status}): {body}"),
                    });
                }

                let fill: OrderResponse = resp.json().await.map_err(|e| EngineError::ParseFailure {
                    component: "exchange".into(),
                    message: e.to_string(),
                })?;
                Ok(OrderFill {
                    price: fill.fills_avg_price(),
                    executed_qty: fill.executed_qty,
                    cum_quote_qty: fill.cummulative_quote_qty,
                    order_id: fill.order_id.to_string(),
                })
            }
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "executedQty")]
    executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty")]
    cummulative_quote_qty: Decimal,
}

impl OrderResponse {
    fn fills_avg_price(&self) -> Decimal {
        if self.executed_qty.is_zero() {
            Decimal::ZERO
        } else {
            self.cummulative_quote_qty / self.executed_qty
        }
    }
}

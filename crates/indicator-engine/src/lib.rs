mod math;

use async_trait::async_trait;
use chrono::Utc;
use engine_core::{
    BollingerBand, BollingerPosition, BollingerWidth, Crossover, EmaSignal, EngineError,
    IndicatorEngine, IndicatorSnapshot, PriceSource, RsiSignal, Trend, TrendDirection,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

const CANDLE_INTERVAL: &str = "5m";
const CANDLE_LOOKBACK: u32 = 100;
const RSI_PERIOD: usize = 14;
const EMA_SHORT: usize = 9;
const EMA_LONG: usize = 21;
const SMA_SHORT: usize = 9;
const SMA_LONG: usize = 21;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STD_DEV: f64 = 2.0;
const VOLUME_SMA_PERIOD: usize = 20;
const SUPPORT_RESISTANCE_LOOKBACK: usize = 30;

/// `IndicatorEngine` (consumed, out of scope per the core's contract) backed
/// by real candle math: pulls `GetCandles` from a `PriceSource` and reduces
/// them to one `IndicatorSnapshot`, the way the corpus's `analyzer.rs`
/// reduces a bar series to one `AnalysisData`.
pub struct CandleIndicatorEngine<P: PriceSource> {
    price_source: std::sync::Arc<P>,
}

impl<P: PriceSource> CandleIndicatorEngine<P> {
    pub fn new(price_source: std::sync::Arc<P>) -> Self {
        Self { price_source }
    }
}

#[async_trait]
impl<P: PriceSource> IndicatorEngine for CandleIndicatorEngine<P> {
    async fn snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, EngineError> {
        let candles = self.price_source.get_candles(symbol, CANDLE_INTERVAL, CANDLE_LOOKBACK).await?;
        if candles.len() < BOLLINGER_PERIOD {
            return Err(EngineError::PreconditionViolated(format!(
                "not enough candles for {symbol} to build a snapshot ({} < {BOLLINGER_PERIOD})",
                candles.len()
            )));
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close.to_f64().unwrap_or(0.0)).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high.to_f64().unwrap_or(0.0)).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low.to_f64().unwrap_or(0.0)).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume.to_f64().unwrap_or(0.0)).collect();

        let price = candles.last().map(|c| c.close).unwrap_or_default();

        let rsi_series = math::rsi(&closes, RSI_PERIOD);
        let rsi_value = rsi_series.last().copied().unwrap_or(50.0);
        let rsi_signal = if rsi_value < 30.0 {
            RsiSignal::Oversold
        } else if rsi_value > 70.0 {
            RsiSignal::Overbought
        } else {
            RsiSignal::Neutral
        };

        let macd = math::macd(&closes, 12, 26, 9);
        let macd_value = macd.macd_line.last().copied().unwrap_or(0.0);
        let macd_signal = macd.signal_line.last().copied().unwrap_or(0.0);
        let histogram = macd.histogram.last().copied().unwrap_or(0.0);
        let prev_histogram = macd.histogram.iter().rev().nth(1).copied().unwrap_or(histogram);
        let crossover = classify_macd_crossover(prev_histogram, histogram);

        let sma_short = math::sma(&closes, SMA_SHORT).last().copied().unwrap_or(price.to_f64().unwrap_or(0.0));
        let sma_long = math::sma(&closes, SMA_LONG).last().copied().unwrap_or(sma_short);

        let ema9 = math::ema(&closes, EMA_SHORT).last().copied().unwrap_or(price.to_f64().unwrap_or(0.0));
        let ema21 = math::ema(&closes, EMA_LONG).last().copied().unwrap_or(ema9);
        let ema_signal = if ema9 > ema21 * 1.0001 {
            EmaSignal::Bullish
        } else if ema9 < ema21 * 0.9999 {
            EmaSignal::Bearish
        } else {
            EmaSignal::Neutral
        };

        let bands = math::bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
        let upper = bands.upper.last().copied().unwrap_or(price.to_f64().unwrap_or(0.0));
        let middle = bands.middle.last().copied().unwrap_or(upper);
        let lower = bands.lower.last().copied().unwrap_or(upper);
        let current_price_f64 = price.to_f64().unwrap_or(middle);
        let position = if current_price_f64 >= upper {
            BollingerPosition::Upper
        } else if current_price_f64 <= lower {
            BollingerPosition::Lower
        } else {
            BollingerPosition::Middle
        };
        let width_ratio = if middle.abs() > f64::EPSILON { (upper - lower) / middle } else { 0.0 };
        let width = if width_ratio < 0.04 {
            BollingerWidth::Narrow
        } else if width_ratio > 0.10 {
            BollingerWidth::Wide
        } else {
            BollingerWidth::Normal
        };

        let volume_sma = math::sma(&volumes, VOLUME_SMA_PERIOD).last().copied().unwrap_or(0.0);
        let last_volume = volumes.last().copied().unwrap_or(0.0);
        let prev_volume = volumes.iter().rev().nth(1).copied().unwrap_or(last_volume);
        let volume_ratio = if volume_sma > 0.0 { last_volume / volume_sma } else { 1.0 };
        let volume_trend = if prev_volume > 0.0 { (last_volume - prev_volume) / prev_volume } else { 0.0 };

        let trend_direction = if ema9 > ema21 && current_price_f64 > sma_long {
            TrendDirection::Bullish
        } else if ema9 < ema21 && current_price_f64 < sma_long {
            TrendDirection::Bearish
        } else {
            TrendDirection::Sideways
        };
        let trend_strength = if ema21.abs() > f64::EPSILON { ((ema9 - ema21) / ema21).abs() } else { 0.0 };

        let (support, resistance) = math::support_resistance(&highs, &lows, current_price_f64, SUPPORT_RESISTANCE_LOOKBACK);

        Ok(IndicatorSnapshot {
            symbol: symbol.to_string(),
            captured_at: Utc::now(),
            price,
            rsi_value,
            rsi_signal,
            macd_value,
            macd_signal,
            histogram,
            crossover,
            sma_short: decimal_from(sma_short),
            sma_long: decimal_from(sma_long),
            ema9: decimal_from(ema9),
            ema21: decimal_from(ema21),
            ema_signal,
            bollinger: BollingerBand {
                upper: decimal_from(upper),
                middle: decimal_from(middle),
                lower: decimal_from(lower),
                position,
                width,
            },
            volume_ratio,
            volume_trend,
            support: support.into_iter().map(decimal_from).collect(),
            resistance: resistance.into_iter().map(decimal_from).collect(),
            trend: Trend { direction: trend_direction, strength: trend_strength },
        })
    }
}

fn classify_macd_crossover(prev_histogram: f64, histogram: f64) -> Crossover {
    if prev_histogram <= 0.0 && histogram > 0.0 {
        Crossover::Bullish
    } else if prev_histogram >= 0.0 && histogram < 0.0 {
        Crossover::Bearish
    } else if histogram > 0.0 && histogram > prev_histogram {
        Crossover::BullishTrend
    } else if histogram < 0.0 && histogram < prev_histogram {
        Crossover::BearishTrend
    } else {
        Crossover::Neutral
    }
}

fn decimal_from(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default()
}

use chrono::{DateTime, Utc};
use engine_core::{CircuitBreakerRow, EngineError, LearningRule, Position, Trade, TradeEvent};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub fn decode_position(payload: String) -> Result<Position, EngineError> {
    serde_json::from_str(&payload).map_err(|e| EngineError::StoreFailure(format!("decode position: {e}")))
}

pub async fn insert_position(tx: &mut Transaction<'_, Sqlite>, position: &Position) -> Result<(), EngineError> {
    let payload = serde_json::to_string(position)
        .map_err(|e| EngineError::StoreFailure(format!("encode position: {e}")))?;
    sqlx::query("INSERT INTO positions (id, symbol, status, entry_time, payload) VALUES (?, ?, ?, ?, ?)")
        .bind(position.id.to_string())
        .bind(&position.symbol)
        .bind(format!("{:?}", position.status))
        .bind(position.entry_time.to_rfc3339())
        .bind(payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| EngineError::StoreFailure(format!("insert position: {e}")))?;
    Ok(())
}

pub async fn update_position(tx: &mut Transaction<'_, Sqlite>, position: &Position) -> Result<(), EngineError> {
    let payload = serde_json::to_string(position)
        .map_err(|e| EngineError::StoreFailure(format!("encode position: {e}")))?;
    sqlx::query("UPDATE positions SET status = ?, payload = ? WHERE id = ?")
        .bind(format!("{:?}", position.status))
        .bind(payload)
        .bind(position.id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| EngineError::StoreFailure(format!("update position: {e}")))?;
    Ok(())
}

pub async fn insert_trade(tx: &mut Transaction<'_, Sqlite>, trade: &Trade) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO trades (id, position_id, symbol, side, trade_type, price, quantity, amount, executed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(trade.id.to_string())
    .bind(trade.position_id.to_string())
    .bind(&trade.symbol)
    .bind(format!("{:?}", trade.side))
    .bind(format!("{:?}", trade.trade_type))
    .bind(trade.price.to_f64().unwrap_or(0.0))
    .bind(trade.quantity.to_f64().unwrap_or(0.0))
    .bind(trade.amount.to_f64().unwrap_or(0.0))
    .bind(trade.executed_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| EngineError::StoreFailure(format!("insert trade: {e}")))?;
    Ok(())
}

pub fn decode_trade(row: SqliteRow) -> Result<Trade, EngineError> {
    let side_str: String = row.get("side");
    let trade_type_str: String = row.get("trade_type");
    Ok(Trade {
        id: row.get::<String, _>("id").parse().map_err(|_| EngineError::StoreFailure("bad trade id".into()))?,
        position_id: row
            .get::<String, _>("position_id")
            .parse()
            .map_err(|_| EngineError::StoreFailure("bad position_id".into()))?,
        symbol: row.get("symbol"),
        side: decode_side(&side_str)?,
        trade_type: decode_trade_type(&trade_type_str)?,
        price: Decimal::from_f64(row.get::<f64, _>("price")).unwrap_or_default(),
        quantity: Decimal::from_f64(row.get::<f64, _>("quantity")).unwrap_or_default(),
        amount: Decimal::from_f64(row.get::<f64, _>("amount")).unwrap_or_default(),
        executed_at: parse_dt(&row.get::<String, _>("executed_at")),
    })
}

fn decode_side(s: &str) -> Result<engine_core::TradeSide, EngineError> {
    match s {
        "Buy" => Ok(engine_core::TradeSide::Buy),
        "Sell" => Ok(engine_core::TradeSide::Sell),
        other => Err(EngineError::StoreFailure(format!("bad trade side {other}"))),
    }
}

fn decode_trade_type(s: &str) -> Result<engine_core::TradeType, EngineError> {
    use engine_core::TradeType::*;
    Ok(match s {
        "Entry" => Entry,
        "Dca1" => Dca1,
        "Dca2" => Dca2,
        "Tp1" => Tp1,
        "Tp2" => Tp2,
        "Tp3" => Tp3,
        "Stop" => Stop,
        "Manual" => Manual,
        "FullExit" => FullExit,
        "PartialExit" => PartialExit,
        other => return Err(EngineError::StoreFailure(format!("bad trade type {other}"))),
    })
}

pub fn decode_event(row: SqliteRow) -> Result<TradeEvent, EngineError> {
    let data_str: String = row.get("data");
    Ok(TradeEvent {
        id: row.get::<String, _>("id").parse().map_err(|_| EngineError::StoreFailure("bad event id".into()))?,
        event_type: decode_event_type(&row.get::<String, _>("event_type"))?,
        symbol: row.get("symbol"),
        data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
        posted: row.get::<i64, _>("posted") != 0,
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        posted_at: row.get::<Option<String>, _>("posted_at").map(|s| parse_dt(&s)),
    })
}

fn decode_event_type(s: &str) -> Result<engine_core::TradeEventType, EngineError> {
    use engine_core::TradeEventType::*;
    Ok(match s {
        "Buy" => Buy,
        "Sell" => Sell,
        "Dca" => Dca,
        "PartialExit" => PartialExit,
        "CircuitBreaker" => CircuitBreaker,
        "HourlySummary" => HourlySummary,
        "ExitScannerAction" => ExitScannerAction,
        "System" => System,
        "ExecutionError" => ExecutionError,
        "DrawdownPause" => DrawdownPause,
        other => return Err(EngineError::StoreFailure(format!("bad event type {other}"))),
    })
}

pub fn decode_circuit_breaker(row: SqliteRow) -> Result<CircuitBreakerRow, EngineError> {
    Ok(CircuitBreakerRow {
        consecutive_losses: row.get::<i64, _>("consecutive_losses") as u32,
        is_active: row.get::<i64, _>("is_active") != 0,
        activated_at: row.get::<Option<String>, _>("activated_at").map(|s| parse_dt(&s)),
        reactivates_at: row.get::<Option<String>, _>("reactivates_at").map(|s| parse_dt(&s)),
        last_loss_symbol: row.get("last_loss_symbol"),
        last_loss_pnl: row
            .get::<Option<f64>, _>("last_loss_pnl")
            .and_then(Decimal::from_f64),
    })
}

pub fn decode_learning_rule(row: SqliteRow) -> Result<LearningRule, EngineError> {
    Ok(LearningRule {
        id: row.get::<String, _>("id").parse().map_err(|_| EngineError::StoreFailure("bad rule id".into()))?,
        rule_text: row.get("rule_text"),
        weight: row.get("weight"),
        sample_size: row.get::<i64, _>("sample_size") as u32,
        win_rate: row.get("win_rate"),
    })
}

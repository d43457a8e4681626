use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventType {
    Buy,
    Sell,
    Dca,
    PartialExit,
    CircuitBreaker,
    HourlySummary,
    ExitScannerAction,
    System,
    ExecutionError,
    DrawdownPause,
}

/// Append-only queue row consumed by notifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: Uuid,
    pub event_type: TradeEventType,
    pub symbol: Option<String>,
    pub data: serde_json::Value,
    pub posted: bool,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl TradeEvent {
    pub fn new(event_type: TradeEventType, symbol: Option<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            symbol,
            data,
            posted: false,
            created_at: Utc::now(),
            posted_at: None,
        }
    }
}

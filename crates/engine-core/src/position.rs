use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// The central aggregate: one open-or-closed lifecycle per symbol per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub tier: crate::symbol::Tier,
    pub status: PositionStatus,
    pub entry_price: Decimal,
    pub avg_entry_price: Decimal,
    pub current_size: Decimal,
    pub total_cost: Decimal,
    pub stop_loss_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    pub tp3_price: Decimal,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub tp3_hit: bool,
    pub dca_level: u8,
    pub remaining_qty: Decimal,
    pub max_unrealized_gain_percent: f64,
    pub max_unrealized_loss_percent: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub realized_pnl_percent: f64,
    pub hold_hours: Option<f64>,
    pub open_decision_id: Uuid,
    pub close_decision_id: Option<Uuid>,
    /// Number of TP1/TP2/partial-exit fills taken so far; not in spec.md's
    /// field list verbatim but needed to track `total_profit_taken` bookkeeping
    /// described in §4.4 SELL/PARTIAL_EXIT.
    #[serde(default)]
    pub partial_exits: u32,
    #[serde(default)]
    pub total_profit_taken: Decimal,
}

impl Position {
    /// P3: stop anchored to the *original* entry price, independent of DCA.
    pub fn stop_loss_for(entry_price: Decimal, stop_pct: Decimal) -> Decimal {
        entry_price * (Decimal::ONE - stop_pct)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, PositionStatus::Open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Entry,
    Dca1,
    Dca2,
    Tp1,
    Tp2,
    Tp3,
    Stop,
    Manual,
    FullExit,
    PartialExit,
}

/// Which take-profit tier an automatic TP-crossing check fired on (§4.4 TP1/TP2/TP3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpTier {
    Tp1,
    Tp2,
    Tp3,
}

impl TpTier {
    pub fn trade_type(self) -> TradeType {
        match self {
            TpTier::Tp1 => TradeType::Tp1,
            TpTier::Tp2 => TradeType::Tp2,
            TpTier::Tp3 => TradeType::Tp3,
        }
    }
}

/// Immutable ledger row per order fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub position_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub trade_type: TradeType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stop_loss_anchors_to_original_entry() {
        // P3: stop_loss_price = entry_price * (1 - tier.stop_pct)
        let stop = Position::stop_loss_for(dec!(100), dec!(0.10));
        assert_eq!(stop, dec!(90.0));
    }
}

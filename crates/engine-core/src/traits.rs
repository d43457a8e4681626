use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{Decision, DecisionAction};
use crate::event::TradeEvent;
use crate::position::{Position, Trade};
use crate::signal::Signal;
use crate::snapshot::IndicatorSnapshot;
use crate::symbol::Symbol;
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub price: Decimal,
    pub executed_qty: Decimal,
    pub cum_quote_qty: Decimal,
    pub order_id: String,
}

/// `PriceSource` (consumed, §6): the exchange's read-side price/candle API.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, EngineError>;
    async fn get_all_prices(&self) -> Result<std::collections::HashMap<String, Decimal>, EngineError>;
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError>;
}

/// `OrderPlacer` (consumed, §6). Paper-mode implementations return a simulated
/// fill at the current price with `order_id` prefixed `PAPER_`.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill, EngineError>;
}

/// Per-signal verdict returned by a batch FastAdvisor call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FastVerdictReply {
    pub symbol: String,
    pub signal_type: crate::signal::SignalType,
    pub strength: crate::signal::SignalStrength,
    pub confidence: f64,
    pub escalate: bool,
    pub reasons: Vec<String>,
}

/// `FastAdvisor` (consumed, §6): text-in/JSON-out, one batch call per cycle.
/// Implementations MUST treat a malformed reply as a no-op verdict
/// (`escalate=false`) rather than propagating a parse error past this trait.
#[async_trait]
pub trait FastAdvisor: Send + Sync {
    async fn evaluate_batch(
        &self,
        triggered: &[crate::snapshot::TriggeredSignal],
    ) -> Vec<FastVerdictReply>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeepDecisionReply {
    pub action: DecisionAction,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_assessment: String,
    pub alternative_considered: Option<String>,
    pub recommended_price: Option<Decimal>,
    pub recommended_size_usd: Option<Decimal>,
    pub exit_percent: Option<f64>,
}

/// `DeepAdvisor` (consumed, §6). Same malformed-collapses-to-no-op contract as
/// `FastAdvisor`; the no-op variant here is `action=Pass`.
#[async_trait]
pub trait DeepAdvisor: Send + Sync {
    async fn decide(&self, prompt: &str) -> DeepDecisionReply;
}

/// `NewsSource` (consumed, §6). Best-effort; failures return the fallback
/// string rather than an error.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn get(&self, symbol: &str, coin_name: &str, max_items: u32) -> String;
}

/// The candle-and-indicator math library (§1: deliberately out of scope).
/// The Scanner consumes it purely as a per-symbol snapshot source; the core
/// never computes RSI/MACD/Bollinger/EMA/SMA math itself.
#[async_trait]
pub trait IndicatorEngine: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, EngineError>;
}

/// Cost model for fills. Default is zero (§9 open question 2); a real
/// deployment can supply a nonzero model without the core changing.
pub trait FeeModel: Send + Sync {
    fn fee(&self, price: Decimal, quantity: Decimal) -> Decimal;
}

pub struct ZeroFeeModel;

impl FeeModel for ZeroFeeModel {
    fn fee(&self, _price: Decimal, _quantity: Decimal) -> Decimal {
        Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub open_count: usize,
    pub max_open: usize,
    pub invested_usd: Decimal,
    pub available_capital_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub realized_pnl_usd: Decimal,
    pub win_rate: f64,
    pub total_pnl_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRule {
    pub id: Uuid,
    pub rule_text: String,
    pub weight: f64,
    pub sample_size: u32,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerRow {
    pub consecutive_losses: u32,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub reactivates_at: Option<DateTime<Utc>>,
    pub last_loss_symbol: Option<String>,
    pub last_loss_pnl: Option<Decimal>,
}

/// `get_event_stats` reply (§6 dashboard surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStats {
    pub total: u64,
    pub posted: u64,
    pub unposted: u64,
}

/// `get_exit_scanner_status` reply. Scoped to what the Store can truthfully
/// derive from persisted rows — per-cycle cooldown/interval bookkeeping lives
/// in the orchestrator's process-local state, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitScannerStatusRow {
    pub open_positions: usize,
    pub last_action_symbol: Option<String>,
    pub last_action_at: Option<DateTime<Utc>>,
}

/// `analyze_position` reply: a position plus the most recently recorded
/// indicator snapshot and unrealized P&L against a caller-supplied price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAnalysis {
    pub position: Position,
    pub latest_snapshot: Option<IndicatorSnapshot>,
    pub unrealized_pnl_usd: Decimal,
    pub unrealized_pnl_percent: f64,
}

/// `update_settings` payload (§6 dashboard surface). Each field left `None`
/// is unchanged; only the fields the dashboard mutator sends get applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    pub max_concurrent_positions: Option<usize>,
    pub entry_cooldown_hours: Option<i64>,
    pub max_drawdown_percent: Option<f64>,
}

/// `Store` (consumed, §6): CRUD + transactional scope over the full data
/// model, plus the dashboard actions the core must expose (§6 "Dashboard API
/// surface").
#[async_trait]
pub trait Store: Send + Sync {
    async fn active_symbols(&self) -> Result<Vec<Symbol>, EngineError>;

    async fn insert_snapshots(&self, snapshots: &[IndicatorSnapshot]) -> Result<(), EngineError>;

    async fn insert_signal(&self, signal: &Signal) -> Result<(), EngineError>;
    async fn last_deep_evaluation(&self, symbol: &str) -> Result<Option<DateTime<Utc>>, EngineError>;

    async fn insert_decision(&self, decision: &Decision) -> Result<(), EngineError>;
    async fn update_decision_execution(
        &self,
        decision_id: Uuid,
        executed: bool,
        notes: Option<String>,
    ) -> Result<(), EngineError>;

    async fn open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError>;
    async fn open_positions(&self) -> Result<Vec<Position>, EngineError>;
    async fn closed_within(&self, symbol: &str, hours: i64) -> Result<bool, EngineError>;

    /// Atomically inserts a new Position + its ENTRY Trade (§4.4 BUY step 4).
    async fn open_position_tx(&self, position: &Position, trade: &Trade) -> Result<(), EngineError>;

    /// Atomically updates a position's DCA fields + inserts the DCA{n} Trade
    /// (§4.4 DCA step 2).
    async fn dca_position_tx(&self, position: &Position, trade: &Trade) -> Result<(), EngineError>;

    /// Atomically updates a position's size/closed state + inserts the
    /// FULL_EXIT or PARTIAL_EXIT Trade (§4.4 SELL/PARTIAL_EXIT step 2).
    async fn exit_position_tx(&self, position: &Position, trade: &Trade) -> Result<(), EngineError>;

    /// `current_prices` marks each open symbol to market for `unrealized_pnl_usd`;
    /// `max_open` is the caller's configured `max_concurrent_positions` (§6 dashboard
    /// surface and review fix: this used to be hardcoded to 0/ZERO here).
    async fn portfolio_snapshot(
        &self,
        total_capital: Decimal,
        current_prices: &std::collections::HashMap<String, Decimal>,
        max_open: usize,
    ) -> Result<PortfolioSnapshot, EngineError>;
    async fn closed_trades(&self, limit: u32) -> Result<Vec<Trade>, EngineError>;

    async fn enqueue_event(&self, event: &TradeEvent) -> Result<(), EngineError>;
    async fn events(&self, only_unposted: bool, limit: u32) -> Result<Vec<TradeEvent>, EngineError>;
    async fn mark_events_posted(&self, ids: &[Uuid]) -> Result<(), EngineError>;
    /// `get_event_stats`: dashboard counts of posted/unposted trade events.
    async fn get_event_stats(&self) -> Result<EventStats, EngineError>;

    async fn circuit_breaker(&self) -> Result<CircuitBreakerRow, EngineError>;
    async fn record_loss(&self, symbol: &str, pnl: Decimal, consecutive_to_activate: u32, cooldown_hours: i64)
        -> Result<CircuitBreakerRow, EngineError>;
    async fn reset_circuit_breaker(&self) -> Result<(), EngineError>;
    async fn clear_circuit_breaker_if_expired(&self) -> Result<CircuitBreakerRow, EngineError>;

    async fn top_learning_rules(&self, limit: u32) -> Result<Vec<LearningRule>, EngineError>;

    async fn signals(&self, limit: u32) -> Result<Vec<Signal>, EngineError>;
    async fn decisions(&self, limit: u32) -> Result<Vec<Decision>, EngineError>;

    async fn is_paused(&self) -> Result<bool, EngineError>;
    async fn pause_trading(&self) -> Result<(), EngineError>;
    async fn resume_trading(&self) -> Result<(), EngineError>;

    /// `get_exit_scanner_status` (§6 dashboard surface).
    async fn get_exit_scanner_status(&self) -> Result<ExitScannerStatusRow, EngineError>;

    /// `analyze_position` (§6 dashboard surface). `current_price` marks the single
    /// open position for `symbol` to market; `Ok(None)` if no open position exists.
    async fn analyze_position(
        &self,
        symbol: &str,
        current_price: Decimal,
    ) -> Result<Option<PositionAnalysis>, EngineError>;

    /// `close_position` (§6 dashboard surface, mobile manual-close action).
    /// `justification` must be at least 10 characters; callers that violate
    /// this get `EngineError::PreconditionViolated` rather than a silent close.
    async fn close_position(
        &self,
        symbol: &str,
        exit_price: Decimal,
        justification: &str,
    ) -> Result<(), EngineError>;

    /// `close_all_positions` (§6 dashboard surface). Same justification floor
    /// as `close_position`, applied once for the whole batch.
    async fn close_all_positions(
        &self,
        current_prices: &std::collections::HashMap<String, Decimal>,
        justification: &str,
    ) -> Result<u32, EngineError>;

    /// `update_settings` (§6 dashboard surface). Returns the settings row after
    /// the merge so the caller can confirm what actually changed.
    async fn update_settings(&self, settings: &EngineSettings) -> Result<EngineSettings, EngineError>;
    async fn get_settings(&self) -> Result<EngineSettings, EngineError>;
}

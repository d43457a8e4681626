mod decision;
mod error;
mod event;
mod position;
mod retry;
mod signal;
mod snapshot;
mod symbol;
mod traits;

pub use decision::{Decision, DecisionAction};
pub use error::EngineError;
pub use event::{TradeEvent, TradeEventType};
pub use position::{Position, PositionStatus, Trade, TradeSide, TradeType, TpTier};
pub use retry::retry_transient;
pub use signal::{Signal, SignalOutcome, SignalStrength, SignalType};
pub use snapshot::{
    BollingerBand, BollingerPosition, BollingerWidth, Crossover, EmaSignal, IndicatorSnapshot,
    RsiSignal, Trend, TrendDirection, TriggerKind, TriggeredSignal,
};
pub use symbol::{Symbol, Tier};
pub use traits::{
    Candle, CircuitBreakerRow, DeepAdvisor, DeepDecisionReply, EngineSettings, EventStats,
    ExitScannerStatusRow, FastAdvisor, FastVerdictReply, FeeModel, IndicatorEngine, LearningRule,
    NewsSource, OrderFill, OrderPlacer, OrderSide, PortfolioSnapshot, PositionAnalysis, PriceSource,
    Store, ZeroFeeModel,
};

pub type Result<T> = std::result::Result<T, EngineError>;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::symbol::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RsiSignal {
    Oversold,
    Overbought,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crossover {
    Bullish,
    Bearish,
    BullishTrend,
    BearishTrend,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmaSignal {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BollingerPosition {
    Upper,
    Middle,
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BollingerWidth {
    Narrow,
    Normal,
    Wide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Sideways,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerBand {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
    pub position: BollingerPosition,
    pub width: BollingerWidth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub strength: f64,
}

/// Point-in-time indicator values for one symbol. Append-only; retained for a
/// configurable window (default 30 days).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub captured_at: DateTime<Utc>,
    pub price: Decimal,
    pub rsi_value: f64,
    pub rsi_signal: RsiSignal,
    pub macd_value: f64,
    pub macd_signal: f64,
    pub histogram: f64,
    pub crossover: Crossover,
    pub sma_short: Decimal,
    pub sma_long: Decimal,
    pub ema9: Decimal,
    pub ema21: Decimal,
    pub ema_signal: EmaSignal,
    pub bollinger: BollingerBand,
    pub volume_ratio: f64,
    pub volume_trend: f64,
    pub support: Vec<Decimal>,
    pub resistance: Vec<Decimal>,
    pub trend: Trend,
}

/// The enumeration of transition kinds the scanner detects (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    RsiOversold,
    RsiOverbought,
    MacdBullishCrossover,
    MacdBearishCrossover,
    EmaBullishCrossover,
    EmaBearishCrossover,
    VolumeSpike,
    BbSqueeze,
    BbLowerTouch,
    BbUpperTouch,
    TrendTurnedBullish,
    TrendTurnedBearish,
}

/// Ephemeral scanner output for one symbol in one cycle. Never persisted as a
/// row; only its downstream Signal Filter evaluation is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredSignal {
    pub symbol: String,
    pub tier: Tier,
    pub price: Decimal,
    pub snapshot: IndicatorSnapshot,
    pub thresholds_crossed: Vec<TriggerKind>,
    pub has_position: bool,
    pub position_snapshot: Option<IndicatorSnapshot>,
}

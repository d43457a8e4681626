use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::{IndicatorSnapshot, TriggerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
    Trap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SignalOutcome {
    #[default]
    Pending,
    Win,
    Loss,
    Neutral,
    NotTraded,
    MissedOpportunity,
}

/// Persistent record of a FastAdvisor evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub triggered_by: Vec<TriggerKind>,
    pub snapshot: IndicatorSnapshot,
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub escalated: bool,
    #[serde(default)]
    pub outcome: SignalOutcome,
    pub created_at: DateTime<Utc>,
}

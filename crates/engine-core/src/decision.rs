use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::SignalOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionAction {
    Buy,
    Sell,
    Dca,
    PartialExit,
    Hold,
    Pass,
    Ignore,
}

impl DecisionAction {
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            DecisionAction::Buy
                | DecisionAction::Sell
                | DecisionAction::Dca
                | DecisionAction::PartialExit
        )
    }
}

/// Persistent record of a DeepAdvisor evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub action: DecisionAction,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_assessment: String,
    pub alternative_considered: Option<String>,
    pub recommended_price: Option<Decimal>,
    pub recommended_size_usd: Option<Decimal>,
    pub exit_percent: Option<f64>,
    /// Full prompt snapshot sent to the advisor, retained for offline training.
    pub prompt_snapshot: String,
    pub executed: bool,
    pub execution_notes: Option<String>,
    #[serde(default)]
    pub outcome: SignalOutcome,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn mark_not_executed(&mut self, reason: impl Into<String>) {
        self.executed = false;
        self.execution_notes = Some(reason.into());
    }

    pub fn mark_executed(&mut self) {
        self.executed = true;
    }
}

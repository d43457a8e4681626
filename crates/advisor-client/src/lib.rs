use std::time::Duration;

use async_trait::async_trait;
use engine_core::{
    DeepAdvisor, DeepDecisionReply, FastAdvisor, FastVerdictReply, NewsSource, SignalStrength,
    SignalType, TriggeredSignal,
};
use engine_core::DecisionAction;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// HTTP adapter for the FastAdvisor (§6). Batches all of a cycle's triggered
/// signals into one request, the way `ml_gate.rs::calibrate_confidences`
/// batches a single call per cycle rather than one per symbol.
pub struct HttpFastAdvisor {
    client: Client,
    base_url: String,
}

impl HttpFastAdvisor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FastRequest<'a> {
    signals: &'a [TriggeredSignal],
}

#[async_trait]
impl FastAdvisor for HttpFastAdvisor {
    async fn evaluate_batch(&self, triggered: &[TriggeredSignal]) -> Vec<FastVerdictReply> {
        if triggered.is_empty() {
            return Vec::new();
        }

        let url = format!("{}/fast-advisor/evaluate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&FastRequest { signals: triggered })
            .send()
            .await;

        match response {
            Ok(resp) => match resp.json::<Vec<FastVerdictReply>>().await {
                Ok(verdicts) => verdicts,
                Err(e) => {
                    tracing::warn!(error = %e, "FastAdvisor reply failed to parse, treating as no-op");
                    no_op_verdicts(triggered, "Parse error")
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "FastAdvisor call failed, treating as no-op");
                no_op_verdicts(triggered, "FastAdvisor unavailable")
            }
        }
    }
}

fn no_op_verdicts(triggered: &[TriggeredSignal], reason: &str) -> Vec<FastVerdictReply> {
    triggered
        .iter()
        .map(|t| FastVerdictReply {
            symbol: t.symbol.clone(),
            signal_type: SignalType::None,
            strength: SignalStrength::Weak,
            confidence: 0.0,
            escalate: false,
            reasons: vec![reason.to_string()],
        })
        .collect()
}

/// HTTP adapter for the DeepAdvisor (§6). Malformed/failed replies collapse to
/// `action=Pass`, matching `ml_gate.rs`'s fallback branch on call failure.
pub struct HttpDeepAdvisor {
    client: Client,
    base_url: String,
}

impl HttpDeepAdvisor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DeepRequest<'a> {
    prompt: &'a str,
}

#[async_trait]
impl DeepAdvisor for HttpDeepAdvisor {
    async fn decide(&self, prompt: &str) -> DeepDecisionReply {
        let url = format!("{}/deep-advisor/decide", self.base_url);
        let response = self.client.post(&url).json(&DeepRequest { prompt }).send().await;

        match response {
            Ok(resp) => match resp.json::<DeepDecisionReply>().await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(error = %e, "DeepAdvisor reply failed to parse, treating as no-op");
                    no_op_decision("Parse error")
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "DeepAdvisor call failed, treating as no-op");
                no_op_decision("DeepAdvisor unavailable")
            }
        }
    }
}

fn no_op_decision(reason: &str) -> DeepDecisionReply {
    DeepDecisionReply {
        action: DecisionAction::Pass,
        confidence: 0.0,
        reasoning: reason.to_string(),
        risk_assessment: "unknown".to_string(),
        alternative_considered: None,
        recommended_price: None,
        recommended_size_usd: None,
        exit_percent: None,
    }
}

/// HTTP adapter for `NewsSource` (§6). Best-effort: any failure returns the
/// fallback string rather than propagating an error, per contract.
pub struct HttpNewsSource {
    client: Client,
    base_url: String,
}

impl HttpNewsSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    summary: String,
}

#[async_trait]
impl NewsSource for HttpNewsSource {
    async fn get(&self, symbol: &str, coin_name: &str, max_items: u32) -> String {
        let url = format!(
            "{}/news?symbol={}&coin={}&max_items={}",
            self.base_url, symbol, coin_name, max_items
        );
        match self.client.get(&url).send().await {
            Ok(resp) => match resp.json::<NewsResponse>().await {
                Ok(body) => body.summary,
                Err(_) => "No recent news available.".to_string(),
            },
            Err(e) => {
                tracing::debug!(error = %e, symbol, "news fetch failed");
                "No recent news available.".to_string()
            }
        }
    }
}

mod sms;
mod webhook;

pub use sms::SmsChannel;
pub use webhook::WebhookChannel;

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{TradeEvent, TradeEventType};
use serde::{Deserialize, Serialize};

const MAX_SMS_LEN: usize = 160;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertType {
    Buy { symbol: String },
    Sell { symbol: String },
    Dca { symbol: String },
    PartialExit { symbol: String },
    CircuitBreaker { symbol: Option<String> },
    DrawdownPause,
    ExecutionError { symbol: Option<String> },
    HourlySummary,
    ExitScannerAction { symbol: String },
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub message: String,
}

impl Alert {
    /// Builds an alert from a queued `TradeEvent` row (notifier sinks consume
    /// the event queue the core writes to, they don't observe state directly).
    pub fn from_event(event: &TradeEvent) -> Self {
        let symbol = event.symbol.clone();
        let (alert_type, title) = match event.event_type {
            TradeEventType::Buy => (AlertType::Buy { symbol: symbol.clone().unwrap_or_default() }, "Position opened"),
            TradeEventType::Sell => (AlertType::Sell { symbol: symbol.clone().unwrap_or_default() }, "Position closed"),
            TradeEventType::Dca => (AlertType::Dca { symbol: symbol.clone().unwrap_or_default() }, "DCA executed"),
            TradeEventType::PartialExit => (
                AlertType::PartialExit { symbol: symbol.clone().unwrap_or_default() },
                "Partial exit",
            ),
            TradeEventType::CircuitBreaker => (AlertType::CircuitBreaker { symbol: symbol.clone() }, "Circuit breaker activated"),
            TradeEventType::DrawdownPause => (AlertType::DrawdownPause, "Drawdown pause"),
            TradeEventType::ExecutionError => (AlertType::ExecutionError { symbol: symbol.clone() }, "Execution error"),
            TradeEventType::HourlySummary => (AlertType::HourlySummary, "Hourly summary"),
            TradeEventType::ExitScannerAction => (
                AlertType::ExitScannerAction { symbol: symbol.clone().unwrap_or_default() },
                "Exit scanner action",
            ),
            TradeEventType::System => (AlertType::System, "System"),
        };

        let body = serde_json::to_string(&event.data).unwrap_or_default();
        Self {
            alert_type,
            created_at: event.created_at,
            title: title.to_string(),
            message: format!("{}{}: {}", title, symbol.map(|s| format!(" [{s}]")).unwrap_or_default(), body),
        }
    }

    pub fn sms_text(&self) -> String {
        let mut text = self.message.clone();
        if text.len() > MAX_SMS_LEN {
            text.truncate(MAX_SMS_LEN - 1);
            text.push('\u{2026}');
        }
        text
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("HTTP error sending alert: {0}")]
    Http(String),
    #[error("channel not configured: {0}")]
    Config(String),
    #[error("rate limit exceeded")]
    RateLimited,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Per-hour sliding bucket (§6: "rate-limited (per-hour bucket)").
pub struct RateLimiter {
    max_per_hour: u32,
    window: Mutex<(DateTime<Utc>, u32)>,
}

impl RateLimiter {
    pub fn new(max_per_hour: u32) -> Self {
        Self { max_per_hour, window: Mutex::new((Utc::now(), 0)) }
    }

    pub fn allow(&self) -> bool {
        let mut window = self.window.lock().unwrap();
        let now = Utc::now();
        if now.signed_duration_since(window.0).num_minutes() >= 60 {
            *window = (now, 0);
        }
        if window.1 >= self.max_per_hour {
            return false;
        }
        window.1 += 1;
        true
    }
}

pub struct Notifier<'a> {
    channels: Vec<&'a dyn NotificationChannel>,
    rate_limiter: RateLimiter,
}

impl<'a> Notifier<'a> {
    pub fn new(channels: Vec<&'a dyn NotificationChannel>, max_per_hour: u32) -> Self {
        Self { channels, rate_limiter: RateLimiter::new(max_per_hour) }
    }

    pub async fn dispatch(&self, event: &TradeEvent) -> Result<(), NotificationError> {
        if !self.rate_limiter.allow() {
            tracing::debug!("notification rate limit reached, dropping alert");
            return Err(NotificationError::RateLimited);
        }

        let alert = Alert::from_event(event);
        for channel in &self.channels {
            if let Err(e) = channel.send(&alert).await {
                tracing::warn!(channel = channel.name(), error = %e, "notification channel failed");
            }
        }
        Ok(())
    }
}

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use decision_maker::ConfidenceThresholds;
use executor::{ExecutorConfig, TierConfig, TierSizing};
use exit_scanner::ExitScannerConfig;
use risk_supervisor::RiskSupervisorConfig;
use rust_decimal::Decimal;
use scanner::{ScannerConfig, ScannerThresholds};
use signal_filter::FilterConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key}: {e}"))
}

/// Assembled configuration for the whole engine, loaded the way
/// `AgentConfig::from_env` assembles the corpus's agent configuration: every
/// tunable has a default via `unwrap_or_else(...).parse()`, every secret is
/// required via `.context("... not set")?`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub log_format_json: bool,

    pub scanner: ScannerConfig,
    pub filter: FilterConfig,
    pub confidence: ConfidenceThresholds,
    pub executor: ExecutorConfig,
    pub exit_scanner_enabled: bool,
    pub exit_scanner: ExitScannerConfig,
    pub risk: RiskSupervisorConfig,

    pub total_capital: Decimal,
    pub paper_trading: bool,

    pub exchange_base_url: String,
    pub exchange_api_key: String,
    pub exchange_api_secret: String,

    pub advisors_fast_base_url: String,
    pub advisors_deep_base_url: String,
    pub advisors_news_base_url: String,
    pub advisors_timeout: Duration,

    pub notifier_sms_api_url: String,
    pub notifier_sms_api_key: String,
    pub notifier_sms_from: String,
    pub notifier_sms_to: String,
    pub notifier_webhook_url: String,
    pub notifier_max_alerts_per_hour: u32,

    pub metrics_log_interval_cycles: u64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let thresholds = ScannerThresholds {
            rsi_oversold: env_or("SCANNER_RSI_OVERSOLD", "30.0")?,
            rsi_overbought: env_or("SCANNER_RSI_OVERBOUGHT", "70.0")?,
            volume_spike_ratio: env_or("SCANNER_VOLUME_SPIKE_RATIO", "2.0")?,
        };
        let scanner = ScannerConfig {
            interval_minutes: env_or("SCANNER_INTERVAL_MINUTES", "5")?,
            signal_cooldown_minutes: env_or("SCANNER_SIGNAL_COOLDOWN_MINUTES", "30")?,
            thresholds,
        };

        let filter = FilterConfig {
            sonnet_dedup_minutes: env_or("ESCALATION_SONNET_DEDUP_MINUTES", "60")?,
            max_concurrent_positions: env_or("ACCOUNT_MAX_CONCURRENT_POSITIONS", "8")?,
        };

        let confidence = ConfidenceThresholds {
            min_entry: env_or("CONFIDENCE_MIN_FOR_NEW_ENTRY", "0.65")?,
            min_exit: env_or("CONFIDENCE_MIN_FOR_EXIT", "0.55")?,
            min_dca: env_or("CONFIDENCE_MIN_FOR_DCA", "0.60")?,
        };

        let tiers = TierConfig {
            tier1: TierSizing {
                base_position_usd: env_or("POSITION_SIZING_TIER_1_BASE_USD", "200")?,
                max_position_usd: env_or("POSITION_SIZING_TIER_1_MAX_USD", "600")?,
                stop_pct: env_or("POSITION_SIZING_TIER_1_STOP_PCT", "0.08")?,
                dca_allowed: true,
            },
            tier2: TierSizing {
                base_position_usd: env_or("POSITION_SIZING_TIER_2_BASE_USD", "150")?,
                max_position_usd: env_or("POSITION_SIZING_TIER_2_MAX_USD", "450")?,
                stop_pct: env_or("POSITION_SIZING_TIER_2_STOP_PCT", "0.10")?,
                dca_allowed: true,
            },
            tier3: TierSizing {
                base_position_usd: env_or("POSITION_SIZING_TIER_3_BASE_USD", "100")?,
                max_position_usd: env_or("POSITION_SIZING_TIER_3_MAX_USD", "300")?,
                stop_pct: env_or("POSITION_SIZING_TIER_3_STOP_PCT", "0.12")?,
                dca_allowed: true,
            },
            tier4: TierSizing {
                base_position_usd: env_or("POSITION_SIZING_TIER_4_BASE_USD", "50")?,
                max_position_usd: env_or("POSITION_SIZING_TIER_4_MAX_USD", "150")?,
                stop_pct: env_or("POSITION_SIZING_TIER_4_STOP_PCT", "0.15")?,
                dca_allowed: false,
            },
        };
        let executor = ExecutorConfig {
            tiers,
            max_concurrent_positions: env_or("ACCOUNT_MAX_CONCURRENT_POSITIONS", "8")?,
            entry_cooldown_hours: env_or("COOLDOWN_HOURS", "24")?,
        };

        let exit_scanner_enabled: bool = env_or("EXIT_SCANNER_ENABLED", "true")?;
        let exit_scanner = ExitScannerConfig {
            interval_cycles: env_or("EXIT_SCANNER_INTERVAL_CYCLES", "3")?,
            urgency_threshold: env_or("EXIT_SCANNER_URGENCY_THRESHOLD", "40.0")?,
            critical_threshold: env_or("EXIT_SCANNER_CRITICAL_THRESHOLD", "70.0")?,
            cooldown_minutes: env_or("EXIT_SCANNER_COOLDOWN_MINUTES", "30")?,
        };

        let risk = RiskSupervisorConfig {
            consecutive_losses_to_activate: env_or("CIRCUIT_BREAKER_CONSECUTIVE_LOSSES", "3")?,
            cooldown_hours: env_or("CIRCUIT_BREAKER_COOLDOWN_HOURS", "4")?,
            max_drawdown_percent: env_or("CIRCUIT_BREAKER_MAX_DRAWDOWN_PERCENT", "15.0")?,
            entry_cooldown_hours: env_or("COOLDOWN_HOURS", "24")?,
        };

        let timeout_seconds: u64 = env_or("ADVISORS_TIMEOUT_SECONDS", "30")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:trading-engine.db".to_string()),
            log_format_json: env::var("RUST_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false),

            scanner,
            filter,
            confidence,
            executor,
            exit_scanner_enabled,
            exit_scanner,
            risk,

            total_capital: env_or("ACCOUNT_TOTAL_CAPITAL", "2000")?,
            paper_trading: env_or("ACCOUNT_PAPER_TRADING", "true")?,

            exchange_base_url: env::var("EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            exchange_api_key: env::var("EXCHANGE_API_KEY").unwrap_or_default(),
            exchange_api_secret: env::var("EXCHANGE_API_SECRET").unwrap_or_default(),

            advisors_fast_base_url: env::var("ADVISORS_FAST_BASE_URL")
                .context("ADVISORS_FAST_BASE_URL not set")?,
            advisors_deep_base_url: env::var("ADVISORS_DEEP_BASE_URL")
                .context("ADVISORS_DEEP_BASE_URL not set")?,
            advisors_news_base_url: env::var("ADVISORS_NEWS_BASE_URL")
                .unwrap_or_else(|_| String::new()),
            advisors_timeout: Duration::from_secs(timeout_seconds),

            notifier_sms_api_url: env::var("NOTIFIER_SMS_API_URL").unwrap_or_default(),
            notifier_sms_api_key: env::var("NOTIFIER_SMS_API_KEY").unwrap_or_default(),
            notifier_sms_from: env::var("NOTIFIER_SMS_FROM").unwrap_or_default(),
            notifier_sms_to: env::var("NOTIFIER_SMS_TO").unwrap_or_default(),
            notifier_webhook_url: env::var("NOTIFIER_WEBHOOK_URL").unwrap_or_default(),
            notifier_max_alerts_per_hour: env_or("NOTIFIER_MAX_ALERTS_PER_HOUR", "20")?,

            metrics_log_interval_cycles: env_or("METRICS_LOG_INTERVAL_CYCLES", "6")?,
        })
    }
}

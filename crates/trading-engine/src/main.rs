mod config;
mod cycle_state;
mod metrics;
mod orchestrator;

use std::sync::Arc;
use std::time::Duration;

use advisor_client::{HttpDeepAdvisor, HttpFastAdvisor, HttpNewsSource};
use anyhow::{Context, Result};
use chrono::Utc;
use cycle_state::{CachedNewsSource, CycleState, CyclingNewsSource};
use decision_maker::DecisionMaker;
use engine_core::{Store, ZeroFeeModel};
use engine_store::SqliteStore;
use exchange_client::HttpExchangeClient;
use executor::Executor;
use exit_scanner::ExitScanner;
use indicator_engine::CandleIndicatorEngine;
use metrics::EngineMetrics;
use notifier::{Notifier, NotificationChannel, SmsChannel, WebhookChannel};
use orchestrator::Pipeline;
use risk_supervisor::RiskSupervisor;
use scanner::Scanner;
use signal_filter::SignalFilter;
use tokio::signal::unix::SignalKind;
use tokio::time;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::EngineConfig::from_env()?;

    if config.log_format_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("starting trading engine");
    tracing::info!(paper_trading = config.paper_trading, total_capital = %config.total_capital, "configuration loaded");

    let store = SqliteStore::connect(&config.database_url).await.context("connecting to store")?;
    reconcile_on_startup(&store).await?;

    let exchange = Arc::new(HttpExchangeClient::new(
        config.exchange_base_url.clone(),
        config.exchange_api_key.clone(),
        config.exchange_api_secret.clone(),
        config.paper_trading,
        config.advisors_timeout,
    ));
    let indicator_engine = Arc::new(CandleIndicatorEngine::new(exchange.clone()));

    let fast_advisor = HttpFastAdvisor::new(config.advisors_fast_base_url.clone(), config.advisors_timeout);
    let deep_advisor = HttpDeepAdvisor::new(config.advisors_deep_base_url.clone(), config.advisors_timeout);
    let news_source = HttpNewsSource::new(config.advisors_news_base_url.clone(), config.advisors_timeout);
    let fee_model = ZeroFeeModel;

    let sms_channel = (!config.notifier_sms_api_url.is_empty()).then(|| {
        SmsChannel::new(
            config.notifier_sms_api_url.clone(),
            config.notifier_sms_api_key.clone(),
            config.notifier_sms_from.clone(),
            config.notifier_sms_to.clone(),
        )
    });
    let webhook_channel = (!config.notifier_webhook_url.is_empty()).then(|| WebhookChannel::new(config.notifier_webhook_url.clone()));

    let mut channels: Vec<&dyn NotificationChannel> = Vec::new();
    if let Some(ref sms) = sms_channel {
        channels.push(sms);
    }
    if let Some(ref webhook) = webhook_channel {
        channels.push(webhook);
    }
    let notifier = Notifier::new(channels, config.notifier_max_alerts_per_hour);

    let scanner = Scanner::new(indicator_engine, config.scanner.clone());
    let signal_filter = SignalFilter::new(&fast_advisor, &store, config.filter.clone());
    let mut cycle_state = CycleState::new();
    let news_cache = CachedNewsSource::new();
    let news = CyclingNewsSource { inner: &news_source, cache: &news_cache };
    let decision_maker = DecisionMaker::new(
        &deep_advisor,
        &store,
        &news,
        &*exchange,
        config.executor.max_concurrent_positions,
        config.confidence.clone(),
    );
    let risk = RiskSupervisor::new(&store, config.risk.clone());
    let executor = Executor::new(&*exchange, &*exchange, &store, &fee_model, &risk, config.executor.clone());
    let exit_scanner = ExitScanner::new(config.exit_scanner.clone());

    let pipeline = Pipeline {
        scanner: &scanner,
        signal_filter: &signal_filter,
        decision_maker: &decision_maker,
        executor: &executor,
        exit_scanner: &exit_scanner,
        risk: &risk,
        notifier: &notifier,
        store: &store,
        price_source: &*exchange,
        exit_scanner_enabled: config.exit_scanner_enabled,
    };

    let mut engine_metrics = EngineMetrics::new(config.metrics_log_interval_cycles);

    let mut interval = time::interval(Duration::from_secs(config.scanner.interval_minutes * 60));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    tracing::info!(
        interval_minutes = config.scanner.interval_minutes,
        exit_scanner_enabled = config.exit_scanner_enabled,
        "entering main loop"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = orchestrator::run_cycle(&pipeline, &mut cycle_state, &mut engine_metrics, config.total_capital).await {
                    tracing::error!(error = %e, "error in trading cycle, continuing");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    engine_metrics.log_metrics();
    tracing::info!("shutdown complete");
    Ok(())
}

/// Logs and flags any OPEN position whose last trade predates process start
/// by more than one scan interval, so a restart after downtime is visible
/// rather than silently resuming as if nothing happened.
async fn reconcile_on_startup(store: &SqliteStore) -> Result<()> {
    let positions = store.open_positions().await.context("loading open positions at startup")?;
    let now = Utc::now();
    for position in positions {
        let last_activity = position.exit_time.unwrap_or(position.entry_time);
        let staleness = now.signed_duration_since(last_activity);
        if staleness.num_minutes() > 5 {
            tracing::warn!(
                symbol = %position.symbol,
                minutes_stale = staleness.num_minutes(),
                "open position predates this process start, reconciling with exchange state on next cycle"
            );
            store
                .enqueue_event(&engine_core::TradeEvent::new(
                    engine_core::TradeEventType::System,
                    Some(position.symbol.clone()),
                    serde_json::json!({ "reconciled_on_startup": true, "minutes_stale": staleness.num_minutes() }),
                ))
                .await
                .context("recording startup reconciliation event")?;
        }
    }
    Ok(())
}

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use decision_maker::DecisionMaker;
use engine_core::{
    DecisionAction, IndicatorEngine, IndicatorSnapshot, PriceSource, Signal, SignalOutcome,
    SignalStrength, SignalType, Store, Tier,
};
use executor::Executor;
use exit_scanner::ExitScanner;
use futures::future::join_all;
use notifier::Notifier;
use risk_supervisor::{CycleGate, RiskSupervisor};
use rust_decimal::Decimal;
use scanner::Scanner;
use signal_filter::SignalFilter;
use uuid::Uuid;

use crate::cycle_state::CycleState;
use crate::metrics::EngineMetrics;

/// Bundles the per-cycle collaborators the way the corpus's `run_trading_cycle`
/// takes a long parameter list of components — grouped into one struct here
/// since this orchestrator wires ten collaborators rather than four.
pub struct Pipeline<'a, E: IndicatorEngine> {
    pub scanner: &'a Scanner<E>,
    pub signal_filter: &'a SignalFilter<'a>,
    pub decision_maker: &'a DecisionMaker<'a>,
    pub executor: &'a Executor<'a>,
    pub exit_scanner: &'a ExitScanner,
    pub risk: &'a RiskSupervisor<'a>,
    pub notifier: &'a Notifier<'a>,
    pub store: &'a dyn Store,
    pub price_source: &'a dyn PriceSource,
    pub exit_scanner_enabled: bool,
}

/// `Orchestrator` (C7). Sequences one scan tick: risk gate, scan, filter,
/// decide + execute, and — every `interval_cycles` ticks — the exit scan.
/// Ordering matches §5: "Risk gates precede Scanner; Scanner precedes Signal
/// Filter; Executor accounting is sequential ... even when Decision calls are
/// parallel."
pub async fn run_cycle<E: IndicatorEngine>(
    pipeline: &Pipeline<'_, E>,
    state: &mut CycleState,
    metrics: &mut EngineMetrics,
    total_capital: Decimal,
) -> anyhow::Result<()> {
    let cycle_start = EngineMetrics::start_timer();

    let gate = pipeline.risk.check_cycle_gate(total_capital).await?;
    match gate {
        CycleGate::Clear => {}
        CycleGate::CircuitBreakerActive(row) => {
            tracing::warn!(losses = row.consecutive_losses, "circuit breaker active, skipping cycle");
            metrics.circuit_breaker_skips += 1;
            drain_events(pipeline).await?;
            metrics.finish_cycle(cycle_start);
            return Ok(());
        }
        CycleGate::DrawdownTripped { total_pnl_percent } => {
            tracing::warn!(total_pnl_percent, "drawdown gate tripped, skipping cycle");
            metrics.drawdown_skips += 1;
            drain_events(pipeline).await?;
            metrics.finish_cycle(cycle_start);
            return Ok(());
        }
    }

    let symbols = pipeline.store.active_symbols().await?;
    let tier_by_symbol: HashMap<String, Tier> =
        symbols.iter().map(|s| (s.code.clone(), s.tier)).collect();

    let open_positions = pipeline.store.open_positions().await?;
    let open_symbols: HashSet<String> = open_positions.iter().map(|p| p.symbol.clone()).collect();

    let scan_start = EngineMetrics::start_timer();
    let scan_result = pipeline.scanner.scan(&symbols, &mut state.scanner, &open_symbols).await;
    metrics.last_scan_duration_ms = scan_start.elapsed().as_millis() as u64;
    metrics.triggers_found += scan_result.triggered.len() as u64;

    pipeline.store.insert_snapshots(&scan_result.snapshots).await?;

    if scan_result.triggered.is_empty() {
        tracing::debug!("calibration cycle: no triggers, snapshots recorded");
        drain_events(pipeline).await?;
        metrics.finish_cycle(cycle_start);
        return Ok(());
    }

    let decide_start = EngineMetrics::start_timer();
    let escalated = pipeline.signal_filter.filter(&scan_result.triggered).await?;
    metrics.signals_escalated += escalated.len() as u64;

    // Decision calls run concurrently; Executor accounting below stays
    // sequential in input order so portfolio-capacity checks observe
    // already-executed BUYs from earlier in the same cycle (§5).
    let decision_futures = escalated.iter().map(|signal| {
        let tier = tier_by_symbol.get(&signal.symbol).copied().unwrap_or(Tier::Tier4);
        async move { pipeline.decision_maker.decide(signal, tier, total_capital).await }
    });
    let decisions: Vec<_> = join_all(decision_futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    metrics.decisions_made += decisions.len() as u64;
    metrics.last_decide_duration_ms = decide_start.elapsed().as_millis() as u64;

    let execute_start = EngineMetrics::start_timer();
    for mut decision in decisions {
        let tier = tier_by_symbol.get(&decision.symbol).copied().unwrap_or(Tier::Tier4);
        let outcome = pipeline.executor.execute(&mut decision, tier, total_capital).await?;
        if decision.action.is_executable() {
            if outcome.executed {
                metrics.trades_executed += 1;
            } else {
                metrics.trades_failed += 1;
            }
        }
    }
    metrics.last_execute_duration_ms = execute_start.elapsed().as_millis() as u64;

    run_tp_crossings(pipeline, metrics).await?;

    if pipeline.exit_scanner_enabled {
        run_exit_scan(pipeline, state, metrics, &tier_by_symbol, total_capital).await?;
    }

    drain_events(pipeline).await?;
    metrics.finish_cycle(cycle_start);
    Ok(())
}

/// Automatic TP1/TP2/TP3 exit check (§4.4), run every cycle regardless of
/// `exit_scanner_enabled` — unlike the advisor-driven exit scan below, this
/// is mechanical price-crossing detection, not a DeepAdvisor re-check.
async fn run_tp_crossings<E: IndicatorEngine>(
    pipeline: &Pipeline<'_, E>,
    metrics: &mut EngineMetrics,
) -> anyhow::Result<()> {
    let positions = pipeline.store.open_positions().await?;
    if positions.is_empty() {
        return Ok(());
    }
    let current_prices = pipeline.price_source.get_all_prices().await.unwrap_or_default();
    let crossings = pipeline.exit_scanner.tp_crossings(&positions, &current_prices);

    for crossing in crossings {
        let outcome = pipeline.executor.execute_tp_exit(&crossing.symbol, crossing.tier).await?;
        if outcome.executed {
            metrics.trades_executed += 1;
            tracing::info!(symbol = %crossing.symbol, tier = ?crossing.tier, "take-profit exit executed");
        } else {
            metrics.trades_failed += 1;
        }
    }

    Ok(())
}

/// Runs the exit scan every `interval_cycles` ticks (§4.5), handing each
/// candidate to the Decision Maker the same way an escalated entry signal is.
async fn run_exit_scan<E: IndicatorEngine>(
    pipeline: &Pipeline<'_, E>,
    state: &mut CycleState,
    metrics: &mut EngineMetrics,
    tier_by_symbol: &HashMap<String, Tier>,
    total_capital: Decimal,
) -> anyhow::Result<()> {
    state.last_exit_scan_cycle += 1;
    let interval = pipeline.exit_scanner.config().interval_cycles as u64;
    if interval > 0 && !state.last_exit_scan_cycle.is_multiple_of(interval) {
        return Ok(());
    }

    let positions = pipeline.store.open_positions().await?;
    if positions.is_empty() {
        return Ok(());
    }

    let snapshots: HashMap<String, IndicatorSnapshot> = positions
        .iter()
        .filter_map(|p| state.scanner.last_snapshot(&p.symbol).map(|s| (p.symbol.clone(), s)))
        .collect();
    let current_prices = pipeline.price_source.get_all_prices().await.unwrap_or_default();

    let now = Utc::now();
    let candidates = pipeline.exit_scanner.scan(&positions, &snapshots, &current_prices, &state.exit_scanner, now);
    metrics.exit_candidates_found += candidates.len() as u64;

    for candidate in candidates {
        let Some(snapshot) = snapshots.get(&candidate.symbol).cloned() else { continue };
        let tier = tier_by_symbol.get(&candidate.symbol).copied().unwrap_or(Tier::Tier4);
        let strength = if candidate.score >= pipeline.exit_scanner.config().critical_threshold {
            SignalStrength::Strong
        } else {
            SignalStrength::Moderate
        };

        let signal = Signal {
            id: Uuid::new_v4(),
            symbol: candidate.symbol.clone(),
            triggered_by: Vec::new(),
            snapshot,
            signal_type: SignalType::Sell,
            strength,
            confidence: (candidate.score / 100.0).min(1.0),
            reasons: candidate.factors.clone(),
            escalated: true,
            outcome: SignalOutcome::Pending,
            created_at: now,
        };
        pipeline.store.insert_signal(&signal).await?;

        let mut decision = pipeline.decision_maker.decide(&signal, tier, total_capital).await?;
        if matches!(decision.action, DecisionAction::Sell | DecisionAction::PartialExit) {
            let outcome = pipeline.executor.execute(&mut decision, tier, total_capital).await?;
            if outcome.executed {
                metrics.trades_executed += 1;
                if matches!(decision.action, DecisionAction::Sell) {
                    state.exit_scanner.record_cooldown(&candidate.symbol, now);
                }
            } else {
                metrics.trades_failed += 1;
            }
        } else {
            pipeline
                .store
                .update_decision_execution(decision.id, false, Some("exit scan: advisor held".to_string()))
                .await?;
        }
    }

    Ok(())
}

/// Drains unposted `trade_events` to every notifier sink (§6 "Event queue
/// (produced): append-only writes to `trade_events`").
async fn drain_events<E: IndicatorEngine>(pipeline: &Pipeline<'_, E>) -> anyhow::Result<()> {
    let events = pipeline.store.events(true, 50).await?;
    if events.is_empty() {
        return Ok(());
    }
    let mut posted_ids = Vec::with_capacity(events.len());
    for event in &events {
        if pipeline.notifier.dispatch(event).await.is_ok() {
            posted_ids.push(event.id);
        }
    }
    if !posted_ids.is_empty() {
        pipeline.store.mark_events_posted(&posted_ids).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use decision_maker::ConfidenceThresholds;
    use engine_core::{
        BollingerBand, BollingerPosition, BollingerWidth, Candle, DeepDecisionReply, EmaSignal,
        EngineError, FastAdvisor, FastVerdictReply, NewsSource, OrderFill, RsiSignal, Trend,
        TrendDirection, ZeroFeeModel,
    };
    use engine_store::SqliteStore;
    use executor::ExecutorConfig;
    use exit_scanner::ExitScannerConfig;
    use risk_supervisor::RiskSupervisorConfig;
    use rust_decimal_macros::dec;
    use scanner::ScannerConfig;
    use signal_filter::FilterConfig;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    async fn seed_symbol(store: &SqliteStore, code: &str, tier: Tier) {
        sqlx::query("INSERT INTO symbols (code, display_name, tier, active) VALUES (?, ?, ?, 1)")
            .bind(code)
            .bind(code)
            .bind(tier.as_u8() as i64)
            .execute(store.pool())
            .await
            .unwrap();
    }

    fn flat_snapshot(symbol: &str, rsi: f64, crossover: engine_core::Crossover, volume_ratio: f64, price: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: symbol.to_string(),
            captured_at: Utc::now(),
            price,
            rsi_value: rsi,
            rsi_signal: if rsi < 30.0 { RsiSignal::Oversold } else { RsiSignal::Neutral },
            macd_value: 0.0,
            macd_signal: 0.0,
            histogram: 0.0,
            crossover,
            sma_short: price,
            sma_long: price,
            ema9: price,
            ema21: price,
            ema_signal: EmaSignal::Neutral,
            bollinger: BollingerBand {
                upper: price * dec!(1.1),
                middle: price,
                lower: price * dec!(0.9),
                position: BollingerPosition::Middle,
                width: BollingerWidth::Normal,
            },
            volume_ratio,
            volume_trend: 0.0,
            support: vec![],
            resistance: vec![],
            trend: Trend { direction: TrendDirection::Sideways, strength: 0.0 },
        }
    }

    /// Returns a neutral snapshot on its first call, then the scenario-1 (§8)
    /// trigger combination (RSI 45->28, MACD bullish crossover, volume spike)
    /// on every call after.
    struct ScriptedIndicatorEngine {
        calls: AtomicU32,
        price: Decimal,
    }

    #[async_trait]
    impl IndicatorEngine for ScriptedIndicatorEngine {
        async fn snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(flat_snapshot(symbol, 45.0, engine_core::Crossover::Neutral, 1.1, self.price))
            } else {
                Ok(flat_snapshot(symbol, 28.0, engine_core::Crossover::Bullish, 2.0, self.price))
            }
        }
    }

    struct StubExchange {
        price: Decimal,
    }

    #[async_trait]
    impl PriceSource for StubExchange {
        async fn get_price(&self, _symbol: &str) -> Result<Decimal, EngineError> {
            Ok(self.price)
        }
        async fn get_all_prices(&self) -> Result<HashMap<String, Decimal>, EngineError> {
            Ok(HashMap::new())
        }
        async fn get_candles(&self, _symbol: &str, _interval: &str, _limit: u32) -> Result<Vec<Candle>, EngineError> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl engine_core::OrderPlacer for StubExchange {
        async fn place_order(
            &self,
            _symbol: &str,
            _side: engine_core::OrderSide,
            quantity: Decimal,
        ) -> Result<OrderFill, EngineError> {
            Ok(OrderFill {
                price: self.price,
                executed_qty: quantity,
                cum_quote_qty: quantity * self.price,
                order_id: "PAPER_test".to_string(),
            })
        }
    }

    struct StubFastAdvisor;

    #[async_trait]
    impl FastAdvisor for StubFastAdvisor {
        async fn evaluate_batch(&self, triggered: &[engine_core::TriggeredSignal]) -> Vec<FastVerdictReply> {
            triggered
                .iter()
                .map(|t| FastVerdictReply {
                    symbol: t.symbol.clone(),
                    signal_type: SignalType::Buy,
                    strength: SignalStrength::Strong,
                    confidence: 0.75,
                    escalate: true,
                    reasons: vec!["oversold bounce with volume confirmation".to_string()],
                })
                .collect()
        }
    }

    struct StubDeepAdvisor;

    #[async_trait]
    impl engine_core::DeepAdvisor for StubDeepAdvisor {
        async fn decide(&self, _prompt: &str) -> DeepDecisionReply {
            DeepDecisionReply {
                action: DecisionAction::Buy,
                confidence: 0.75,
                reasoning: "technical setup confirmed, news clean".to_string(),
                risk_assessment: "moderate".to_string(),
                alternative_considered: None,
                recommended_price: Some(dec!(100)),
                recommended_size_usd: Some(dec!(600)),
                exit_percent: None,
            }
        }
    }

    struct StubNews;

    #[async_trait]
    impl NewsSource for StubNews {
        async fn get(&self, _symbol: &str, _coin_name: &str, _max_items: u32) -> String {
            "no material news".to_string()
        }
    }

    #[tokio::test]
    async fn fresh_buy_opens_position_anchored_to_fill_price() {
        // Scenario 1 (§8): ETHUSDT tier1, RSI 45->28 with a bullish MACD
        // crossover and a volume spike escalates through both advisors and
        // opens a position whose stop and take-profits anchor to the fill.
        let store = memory_store().await;
        seed_symbol(&store, "ETHUSDT", Tier::Tier1).await;

        let engine = std::sync::Arc::new(ScriptedIndicatorEngine { calls: AtomicU32::new(0), price: dec!(100) });
        let exchange = StubExchange { price: dec!(100) };
        let fast_advisor = StubFastAdvisor;
        let deep_advisor = StubDeepAdvisor;
        let news = StubNews;
        let fee_model = ZeroFeeModel;

        let scanner = Scanner::new(engine, ScannerConfig::default());
        let signal_filter = SignalFilter::new(&fast_advisor, &store, FilterConfig::default());
        let decision_maker = DecisionMaker::new(
            &deep_advisor,
            &store,
            &news,
            &exchange,
            ExecutorConfig::default().max_concurrent_positions,
            ConfidenceThresholds::default(),
        );
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&exchange, &exchange, &store, &fee_model, &risk, ExecutorConfig::default());
        let exit_scanner = ExitScanner::new(ExitScannerConfig::default());
        let notifier = Notifier::new(vec![], 100);

        let pipeline = Pipeline {
            scanner: &scanner,
            signal_filter: &signal_filter,
            decision_maker: &decision_maker,
            executor: &executor,
            exit_scanner: &exit_scanner,
            risk: &risk,
            notifier: &notifier,
            store: &store,
            price_source: &exchange,
            exit_scanner_enabled: false,
        };

        let mut state = CycleState::new();
        let mut metrics = EngineMetrics::new(10);

        // Cycle 1 calibrates prev[]; nothing to compare against yet (P6).
        run_cycle(&pipeline, &mut state, &mut metrics, dec!(2000)).await.unwrap();
        assert!(store.open_position("ETHUSDT").await.unwrap().is_none());

        // Cycle 2 crosses all three thresholds and should open a position.
        run_cycle(&pipeline, &mut state, &mut metrics, dec!(2000)).await.unwrap();

        let position = store.open_position("ETHUSDT").await.unwrap().expect("position should be open");
        assert_eq!(position.entry_price, dec!(100));
        assert_eq!(position.avg_entry_price, dec!(100));
        assert_eq!(position.stop_loss_price, dec!(92.00));
        assert_eq!(position.tp1_price, dec!(105.00));
        assert_eq!(metrics.trades_executed, 1);
    }

    #[tokio::test]
    async fn circuit_breaker_skips_cycle_with_no_scanning() {
        // Scenario 4 (§8): three consecutive losses trip the breaker; the
        // following cycle must bail out via the risk gate before scanning.
        let store = memory_store().await;
        seed_symbol(&store, "ETHUSDT", Tier::Tier1).await;

        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        risk.record_loss("ADAUSDT", dec!(-10)).await.unwrap();
        risk.record_loss("OPUSDT", dec!(-5)).await.unwrap();
        let row = risk.record_loss("LINKUSDT", dec!(-8)).await.unwrap();
        assert!(row.is_active);

        let events = store.events(true, 10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == engine_core::TradeEventType::CircuitBreaker));

        let engine = std::sync::Arc::new(ScriptedIndicatorEngine { calls: AtomicU32::new(0), price: dec!(100) });
        let exchange = StubExchange { price: dec!(100) };
        let fast_advisor = StubFastAdvisor;
        let deep_advisor = StubDeepAdvisor;
        let news = StubNews;
        let fee_model = ZeroFeeModel;

        let scanner = Scanner::new(engine, ScannerConfig::default());
        let signal_filter = SignalFilter::new(&fast_advisor, &store, FilterConfig::default());
        let decision_maker = DecisionMaker::new(
            &deep_advisor,
            &store,
            &news,
            &exchange,
            ExecutorConfig::default().max_concurrent_positions,
            ConfidenceThresholds::default(),
        );
        let executor = Executor::new(&exchange, &exchange, &store, &fee_model, &risk, ExecutorConfig::default());
        let exit_scanner = ExitScanner::new(ExitScannerConfig::default());
        let notifier = Notifier::new(vec![], 100);

        let pipeline = Pipeline {
            scanner: &scanner,
            signal_filter: &signal_filter,
            decision_maker: &decision_maker,
            executor: &executor,
            exit_scanner: &exit_scanner,
            risk: &risk,
            notifier: &notifier,
            store: &store,
            price_source: &exchange,
            exit_scanner_enabled: false,
        };

        let mut state = CycleState::new();
        let mut metrics = EngineMetrics::new(10);

        run_cycle(&pipeline, &mut state, &mut metrics, dec!(2000)).await.unwrap();

        assert_eq!(metrics.circuit_breaker_skips, 1);
        assert_eq!(metrics.triggers_found, 0);
        assert!(store.open_position("ETHUSDT").await.unwrap().is_none());
    }
}

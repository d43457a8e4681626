use std::collections::HashMap;

use chrono::Utc;
use engine_core::{
    FastAdvisor, FastVerdictReply, Signal, SignalStrength, SignalType, Store, TriggeredSignal,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub sonnet_dedup_minutes: i64,
    pub max_concurrent_positions: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sonnet_dedup_minutes: 60,
            max_concurrent_positions: 8,
        }
    }
}

pub struct SignalFilter<'a> {
    advisor: &'a dyn FastAdvisor,
    store: &'a dyn Store,
    config: FilterConfig,
}

impl<'a> SignalFilter<'a> {
    pub fn new(advisor: &'a dyn FastAdvisor, store: &'a dyn Store, config: FilterConfig) -> Self {
        Self { advisor, store, config }
    }

    /// `Filter(triggered[]) -> escalated[]` (§4.2). Persists exactly one
    /// `Signal` row per input, and returns only the subset that survives all
    /// five gates.
    pub async fn filter(
        &self,
        triggered: &[TriggeredSignal],
    ) -> Result<Vec<Signal>, engine_core::EngineError> {
        if triggered.is_empty() {
            return Ok(Vec::new());
        }

        let verdicts = self.advisor.evaluate_batch(triggered).await;
        let by_symbol: HashMap<&str, &FastVerdictReply> =
            verdicts.iter().map(|v| (v.symbol.as_str(), v)).collect();

        let mut escalated = Vec::new();

        for t in triggered {
            let verdict = by_symbol.get(t.symbol.as_str());
            let (signal_type, strength, confidence, reasons, advisor_escalate) = match verdict {
                Some(v) => (v.signal_type, v.strength, v.confidence, v.reasons.clone(), v.escalate),
                None => (
                    SignalType::None,
                    SignalStrength::Weak,
                    0.0,
                    vec!["No FastAdvisor verdict for symbol".to_string()],
                    false,
                ),
            };

            let gate_result = self
                .evaluate_gates(t, signal_type, strength, confidence, advisor_escalate)
                .await;

            let signal = Signal {
                id: Uuid::new_v4(),
                symbol: t.symbol.clone(),
                triggered_by: t.thresholds_crossed.clone(),
                snapshot: t.snapshot.clone(),
                signal_type,
                strength,
                confidence,
                reasons,
                escalated: gate_result.is_ok(),
                outcome: Default::default(),
                created_at: Utc::now(),
            };

            self.store.insert_signal(&signal).await?;

            if gate_result.is_ok() {
                escalated.push(signal);
            } else if let Err(reason) = gate_result {
                tracing::debug!(symbol = %t.symbol, reason, "signal not escalated");
            }
        }

        Ok(escalated)
    }

    /// Returns `Ok(())` if all five gates pass, else `Err(reason)`.
    async fn evaluate_gates(
        &self,
        t: &TriggeredSignal,
        signal_type: SignalType,
        strength: SignalStrength,
        confidence: f64,
        advisor_escalate: bool,
    ) -> Result<(), String> {
        // Gate 1.
        let strength_ok = matches!(strength, SignalStrength::Strong | SignalStrength::Moderate);
        if !(advisor_escalate && strength_ok && confidence >= 0.60) {
            return Err("advisor did not escalate".to_string());
        }

        // Gate 2.
        let multi_trigger = t.thresholds_crossed.len() >= 2;
        let strong_high_conf = matches!(strength, SignalStrength::Strong) && confidence >= 0.70;
        if !(multi_trigger || strong_high_conf) {
            return Err("single weak trigger insufficient".to_string());
        }

        // Gate 3.
        if matches!(signal_type, SignalType::Sell) && !t.has_position {
            return Err("SELL signal with no open position".to_string());
        }

        // Gate 4.
        if matches!(signal_type, SignalType::Buy) && {
            let open = self.store.open_positions().await.map_err(|e| e.to_string())?;
            open.len() >= self.config.max_concurrent_positions
        } {
            return Err("portfolio at max concurrent positions".to_string());
        }

        // Gate 5: dedup, SELL bypasses when a position exists.
        let bypasses_dedup = matches!(signal_type, SignalType::Sell) && t.has_position;
        if !bypasses_dedup {
            if let Some(last) = self
                .store
                .last_deep_evaluation(&t.symbol)
                .await
                .map_err(|e| e.to_string())?
            {
                let minutes_ago = Utc::now().signed_duration_since(last).num_minutes();
                if minutes_ago < self.config.sonnet_dedup_minutes {
                    return Err(format!("Sonnet evaluated {minutes_ago}m ago"));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine_core::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct StubAdvisor(Vec<FastVerdictReply>);

    #[async_trait]
    impl FastAdvisor for StubAdvisor {
        async fn evaluate_batch(&self, _triggered: &[TriggeredSignal]) -> Vec<FastVerdictReply> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct StubStore {
        signals: Mutex<Vec<Signal>>,
        open: Vec<Position>,
        last_deep_eval: Option<chrono::DateTime<Utc>>,
    }

    #[async_trait]
    impl Store for StubStore {
        async fn active_symbols(&self) -> Result<Vec<Symbol>, EngineError> { Ok(vec![]) }
        async fn insert_snapshots(&self, _s: &[IndicatorSnapshot]) -> Result<(), EngineError> { Ok(()) }
        async fn insert_signal(&self, signal: &Signal) -> Result<(), EngineError> {
            self.signals.lock().unwrap().push(signal.clone());
            Ok(())
        }
        async fn last_deep_evaluation(&self, _symbol: &str) -> Result<Option<chrono::DateTime<Utc>>, EngineError> {
            Ok(self.last_deep_eval)
        }
        async fn insert_decision(&self, _d: &Decision) -> Result<(), EngineError> { Ok(()) }
        async fn update_decision_execution(&self, _id: Uuid, _e: bool, _n: Option<String>) -> Result<(), EngineError> { Ok(()) }
        async fn open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError> {
            Ok(self.open.iter().find(|p| p.symbol == symbol).cloned())
        }
        async fn open_positions(&self) -> Result<Vec<Position>, EngineError> { Ok(self.open.clone()) }
        async fn closed_within(&self, _s: &str, _h: i64) -> Result<bool, EngineError> { Ok(false) }
        async fn open_position_tx(&self, _p: &Position, _t: &Trade) -> Result<(), EngineError> { Ok(()) }
        async fn dca_position_tx(&self, _p: &Position, _t: &Trade) -> Result<(), EngineError> { Ok(()) }
        async fn exit_position_tx(&self, _p: &Position, _t: &Trade) -> Result<(), EngineError> { Ok(()) }
        async fn portfolio_snapshot(
            &self,
            _c: Decimal,
            _prices: &HashMap<String, Decimal>,
            _max_open: usize,
        ) -> Result<PortfolioSnapshot, EngineError> {
            unimplemented!()
        }
        async fn closed_trades(&self, _l: u32) -> Result<Vec<Trade>, EngineError> { Ok(vec![]) }
        async fn enqueue_event(&self, _e: &TradeEvent) -> Result<(), EngineError> { Ok(()) }
        async fn events(&self, _o: bool, _l: u32) -> Result<Vec<TradeEvent>, EngineError> { Ok(vec![]) }
        async fn mark_events_posted(&self, _ids: &[Uuid]) -> Result<(), EngineError> { Ok(()) }
        async fn circuit_breaker(&self) -> Result<CircuitBreakerRow, EngineError> { unimplemented!() }
        async fn record_loss(&self, _s: &str, _p: Decimal, _c: u32, _h: i64) -> Result<CircuitBreakerRow, EngineError> { unimplemented!() }
        async fn reset_circuit_breaker(&self) -> Result<(), EngineError> { Ok(()) }
        async fn clear_circuit_breaker_if_expired(&self) -> Result<CircuitBreakerRow, EngineError> { unimplemented!() }
        async fn top_learning_rules(&self, _l: u32) -> Result<Vec<LearningRule>, EngineError> { Ok(vec![]) }
        async fn signals(&self, _l: u32) -> Result<Vec<Signal>, EngineError> { Ok(vec![]) }
        async fn decisions(&self, _l: u32) -> Result<Vec<Decision>, EngineError> { Ok(vec![]) }
        async fn is_paused(&self) -> Result<bool, EngineError> { Ok(false) }
        async fn pause_trading(&self) -> Result<(), EngineError> { Ok(()) }
        async fn resume_trading(&self) -> Result<(), EngineError> { Ok(()) }
        async fn get_event_stats(&self) -> Result<EventStats, EngineError> {
            Ok(EventStats { total: 0, posted: 0, unposted: 0 })
        }
        async fn get_exit_scanner_status(&self) -> Result<ExitScannerStatusRow, EngineError> {
            Ok(ExitScannerStatusRow { open_positions: 0, last_action_symbol: None, last_action_at: None })
        }
        async fn analyze_position(&self, _symbol: &str, _price: Decimal) -> Result<Option<PositionAnalysis>, EngineError> {
            Ok(None)
        }
        async fn close_position(&self, _symbol: &str, _price: Decimal, _justification: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close_all_positions(&self, _prices: &HashMap<String, Decimal>, _justification: &str) -> Result<u32, EngineError> {
            Ok(0)
        }
        async fn update_settings(&self, settings: &EngineSettings) -> Result<EngineSettings, EngineError> {
            Ok(settings.clone())
        }
        async fn get_settings(&self) -> Result<EngineSettings, EngineError> {
            Ok(EngineSettings::default())
        }
    }

    fn sample_triggered(symbol: &str, crossed: Vec<TriggerKind>, has_position: bool) -> TriggeredSignal {
        TriggeredSignal {
            symbol: symbol.to_string(),
            tier: Tier::Tier1,
            price: dec!(100),
            snapshot: dummy_snapshot(symbol),
            thresholds_crossed: crossed,
            has_position,
            position_snapshot: None,
        }
    }

    fn dummy_snapshot(symbol: &str) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: symbol.to_string(),
            captured_at: Utc::now(),
            price: dec!(100),
            rsi_value: 28.0,
            rsi_signal: RsiSignal::Oversold,
            macd_value: 0.0,
            macd_signal: 0.0,
            histogram: 0.0,
            crossover: Crossover::Bullish,
            sma_short: dec!(100),
            sma_long: dec!(100),
            ema9: dec!(100),
            ema21: dec!(100),
            ema_signal: EmaSignal::Neutral,
            bollinger: BollingerBand {
                upper: dec!(110),
                middle: dec!(100),
                lower: dec!(90),
                position: BollingerPosition::Middle,
                width: BollingerWidth::Normal,
            },
            volume_ratio: 2.0,
            volume_trend: 0.0,
            support: vec![],
            resistance: vec![],
            trend: Trend { direction: TrendDirection::Bullish, strength: 1.0 },
        }
    }

    #[tokio::test]
    async fn strong_multi_trigger_escalates() {
        let triggered = vec![sample_triggered(
            "ETHUSDT",
            vec![TriggerKind::RsiOversold, TriggerKind::MacdBullishCrossover, TriggerKind::VolumeSpike],
            false,
        )];
        let advisor = StubAdvisor(vec![FastVerdictReply {
            symbol: "ETHUSDT".to_string(),
            signal_type: SignalType::Buy,
            strength: SignalStrength::Strong,
            confidence: 0.75,
            escalate: true,
            reasons: vec!["oversold bounce".to_string()],
        }]);
        let store = StubStore::default();
        let filter = SignalFilter::new(&advisor, &store, FilterConfig::default());

        let escalated = filter.filter(&triggered).await.unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(store.signals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sell_without_position_is_rejected() {
        let triggered = vec![sample_triggered(
            "ETHUSDT",
            vec![TriggerKind::RsiOverbought, TriggerKind::MacdBearishCrossover],
            false,
        )];
        let advisor = StubAdvisor(vec![FastVerdictReply {
            symbol: "ETHUSDT".to_string(),
            signal_type: SignalType::Sell,
            strength: SignalStrength::Strong,
            confidence: 0.8,
            escalate: true,
            reasons: vec![],
        }]);
        let store = StubStore::default();
        let filter = SignalFilter::new(&advisor, &store, FilterConfig::default());

        let escalated = filter.filter(&triggered).await.unwrap();
        assert!(escalated.is_empty());
        // Every evaluation is still persisted as a Signal row regardless of escalation.
        assert_eq!(store.signals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dedup_blocks_re_escalation() {
        // Scenario 6 (§8).
        let triggered = vec![sample_triggered(
            "ETHUSDT",
            vec![TriggerKind::RsiOversold, TriggerKind::VolumeSpike],
            false,
        )];
        let advisor = StubAdvisor(vec![FastVerdictReply {
            symbol: "ETHUSDT".to_string(),
            signal_type: SignalType::Buy,
            strength: SignalStrength::Strong,
            confidence: 0.75,
            escalate: true,
            reasons: vec![],
        }]);
        let store = StubStore {
            last_deep_eval: Some(Utc::now() - chrono::Duration::minutes(10)),
            ..Default::default()
        };
        let filter = SignalFilter::new(&advisor, &store, FilterConfig::default());

        let escalated = filter.filter(&triggered).await.unwrap();
        assert!(escalated.is_empty());
        assert_eq!(store.signals.lock().unwrap().len(), 1);
    }
}

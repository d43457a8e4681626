use chrono::Utc;
use engine_core::{CircuitBreakerRow, EngineError, Store, TradeEvent, TradeEventType};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct RiskSupervisorConfig {
    pub consecutive_losses_to_activate: u32,
    pub cooldown_hours: i64,
    pub max_drawdown_percent: f64,
    pub entry_cooldown_hours: i64,
}

impl Default for RiskSupervisorConfig {
    fn default() -> Self {
        Self {
            consecutive_losses_to_activate: 3,
            cooldown_hours: 4,
            max_drawdown_percent: 15.0,
            entry_cooldown_hours: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CycleGate {
    Clear,
    CircuitBreakerActive(CircuitBreakerRow),
    DrawdownTripped { total_pnl_percent: f64 },
}

impl CycleGate {
    pub fn can_trade(&self) -> bool {
        matches!(self, CycleGate::Clear)
    }
}

pub struct RiskSupervisor<'a> {
    store: &'a dyn Store,
    config: RiskSupervisorConfig,
}

impl<'a> RiskSupervisor<'a> {
    pub fn new(store: &'a dyn Store, config: RiskSupervisorConfig) -> Self {
        Self { store, config }
    }

    /// Cycle-start gate (§4.6): clears an expired breaker, then checks breaker
    /// and drawdown state in that order.
    pub async fn check_cycle_gate(&self, total_capital: Decimal) -> Result<CycleGate, EngineError> {
        let breaker = self.store.clear_circuit_breaker_if_expired().await?;
        if breaker.is_active {
            return Ok(CycleGate::CircuitBreakerActive(breaker));
        }

        // Only total_pnl_percent is read here, so mark-to-market prices and the
        // configured position cap are irrelevant to this gate.
        let portfolio = self
            .store
            .portfolio_snapshot(total_capital, &std::collections::HashMap::new(), 0)
            .await?;
        if portfolio.total_pnl_percent < -self.config.max_drawdown_percent {
            self.store
                .enqueue_event(&TradeEvent::new(
                    TradeEventType::DrawdownPause,
                    None,
                    serde_json::json!({ "total_pnl_percent": portfolio.total_pnl_percent }),
                ))
                .await?;
            return Ok(CycleGate::DrawdownTripped { total_pnl_percent: portfolio.total_pnl_percent });
        }

        Ok(CycleGate::Clear)
    }

    /// `RecordLoss(symbol, pnl)` (§4.6). Activates the breaker once the
    /// consecutive-loss threshold is reached and emits a CIRCUIT_BREAKER event
    /// (the notifier turns this into an SMS alert when it drains the queue).
    pub async fn record_loss(&self, symbol: &str, pnl: Decimal) -> Result<CircuitBreakerRow, EngineError> {
        let row = self
            .store
            .record_loss(
                symbol,
                pnl,
                self.config.consecutive_losses_to_activate,
                self.config.cooldown_hours,
            )
            .await?;

        if row.is_active {
            self.store
                .enqueue_event(&TradeEvent::new(
                    TradeEventType::CircuitBreaker,
                    Some(symbol.to_string()),
                    serde_json::json!({
                        "consecutive_losses": row.consecutive_losses,
                        "reactivates_at": row.reactivates_at,
                    }),
                ))
                .await?;
            tracing::warn!(symbol, losses = row.consecutive_losses, "circuit breaker activated");
        }

        Ok(row)
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.store.reset_circuit_breaker().await
    }

    /// Entry cooldown lookup (§4.6): a symbol whose position closed within
    /// `entry_cooldown_hours` may not be re-entered.
    pub async fn can_reenter(&self, symbol: &str) -> Result<bool, EngineError> {
        let closed_recently = self.store.closed_within(symbol, self.config.entry_cooldown_hours).await?;
        Ok(!closed_recently)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use engine_core::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct StubStore {
        breaker: Mutex<CircuitBreakerRow>,
        total_pnl_percent: f64,
    }

    #[async_trait]
    impl Store for StubStore {
        async fn active_symbols(&self) -> Result<Vec<Symbol>, EngineError> { Ok(vec![]) }
        async fn insert_snapshots(&self, _s: &[IndicatorSnapshot]) -> Result<(), EngineError> { Ok(()) }
        async fn insert_signal(&self, _s: &Signal) -> Result<(), EngineError> { Ok(()) }
        async fn last_deep_evaluation(&self, _symbol: &str) -> Result<Option<DateTime<Utc>>, EngineError> { Ok(None) }
        async fn insert_decision(&self, _d: &Decision) -> Result<(), EngineError> { Ok(()) }
        async fn update_decision_execution(&self, _id: Uuid, _e: bool, _n: Option<String>) -> Result<(), EngineError> { Ok(()) }
        async fn open_position(&self, _symbol: &str) -> Result<Option<Position>, EngineError> { Ok(None) }
        async fn open_positions(&self) -> Result<Vec<Position>, EngineError> { Ok(vec![]) }
        async fn closed_within(&self, _s: &str, _h: i64) -> Result<bool, EngineError> { Ok(false) }
        async fn open_position_tx(&self, _p: &Position, _t: &Trade) -> Result<(), EngineError> { Ok(()) }
        async fn dca_position_tx(&self, _p: &Position, _t: &Trade) -> Result<(), EngineError> { Ok(()) }
        async fn exit_position_tx(&self, _p: &Position, _t: &Trade) -> Result<(), EngineError> { Ok(()) }
        async fn portfolio_snapshot(
            &self,
            _c: Decimal,
            _prices: &std::collections::HashMap<String, Decimal>,
            _max_open: usize,
        ) -> Result<PortfolioSnapshot, EngineError> {
            Ok(PortfolioSnapshot {
                open_count: 0,
                max_open: 8,
                invested_usd: Decimal::ZERO,
                available_capital_usd: Decimal::ZERO,
                unrealized_pnl_usd: Decimal::ZERO,
                realized_pnl_usd: Decimal::ZERO,
                win_rate: 0.0,
                total_pnl_percent: self.total_pnl_percent,
            })
        }
        async fn closed_trades(&self, _l: u32) -> Result<Vec<Trade>, EngineError> { Ok(vec![]) }
        async fn enqueue_event(&self, _e: &TradeEvent) -> Result<(), EngineError> { Ok(()) }
        async fn events(&self, _o: bool, _l: u32) -> Result<Vec<TradeEvent>, EngineError> { Ok(vec![]) }
        async fn mark_events_posted(&self, _ids: &[Uuid]) -> Result<(), EngineError> { Ok(()) }
        async fn circuit_breaker(&self) -> Result<CircuitBreakerRow, EngineError> { Ok(self.breaker.lock().unwrap().clone()) }
        async fn record_loss(&self, symbol: &str, pnl: Decimal, consecutive_to_activate: u32, cooldown_hours: i64) -> Result<CircuitBreakerRow, EngineError> {
            let mut row = self.breaker.lock().unwrap();
            row.consecutive_losses += 1;
            row.last_loss_symbol = Some(symbol.to_string());
            row.last_loss_pnl = Some(pnl);
            if row.consecutive_losses >= consecutive_to_activate {
                row.is_active = true;
                row.activated_at = Some(Utc::now());
                row.reactivates_at = Some(Utc::now() + chrono::Duration::hours(cooldown_hours));
            }
            Ok(row.clone())
        }
        async fn reset_circuit_breaker(&self) -> Result<(), EngineError> {
            *self.breaker.lock().unwrap() = CircuitBreakerRow {
                consecutive_losses: 0,
                is_active: false,
                activated_at: None,
                reactivates_at: None,
                last_loss_symbol: None,
                last_loss_pnl: None,
            };
            Ok(())
        }
        async fn clear_circuit_breaker_if_expired(&self) -> Result<CircuitBreakerRow, EngineError> {
            let mut row = self.breaker.lock().unwrap();
            if row.is_active {
                if let Some(reactivates_at) = row.reactivates_at {
                    if reactivates_at <= Utc::now() {
                        row.is_active = false;
                    }
                }
            }
            Ok(row.clone())
        }
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
        async fn close_all_positions(&self, _prices: &std::collections::HashMap<String, Decimal>, _justification: &str) -> Result<u32, EngineError> {
            Ok(0)
        }
        async fn update_settings(&self, settings: &EngineSettings) -> Result<EngineSettings, EngineError> {
            Ok(settings.clone())
        }
        async fn get_settings(&self) -> Result<EngineSettings, EngineError> {
            Ok(EngineSettings::default())
        }
    }

    fn empty_breaker() -> CircuitBreakerRow {
        CircuitBreakerRow {
            consecutive_losses: 0,
            is_active: false,
            activated_at: None,
            reactivates_at: None,
            last_loss_symbol: None,
            last_loss_pnl: None,
        }
    }

    #[tokio::test]
    async fn third_consecutive_loss_activates_breaker() {
        let store = StubStore { breaker: Mutex::new(empty_breaker()), total_pnl_percent: 0.0 };
        let supervisor = RiskSupervisor::new(&store, RiskSupervisorConfig::default());

        supervisor.record_loss("ETHUSDT", dec!(-10)).await.unwrap();
        supervisor.record_loss("ETHUSDT", dec!(-5)).await.unwrap();
        let row = supervisor.record_loss("ETHUSDT", dec!(-8)).await.unwrap();

        assert!(row.is_active);
        assert_eq!(row.consecutive_losses, 3);
    }

    #[tokio::test]
    async fn cycle_gate_skips_when_breaker_active() {
        let mut breaker = empty_breaker();
        breaker.is_active = true;
        breaker.reactivates_at = Some(Utc::now() + chrono::Duration::hours(1));
        let store = StubStore { breaker: Mutex::new(breaker), total_pnl_percent: 0.0 };
        let supervisor = RiskSupervisor::new(&store, RiskSupervisorConfig::default());

        let gate = supervisor.check_cycle_gate(dec!(2000)).await.unwrap();
        assert!(!gate.can_trade());
    }

    #[tokio::test]
    async fn cycle_gate_skips_on_drawdown() {
        let store = StubStore { breaker: Mutex::new(empty_breaker()), total_pnl_percent: -20.0 };
        let supervisor = RiskSupervisor::new(&store, RiskSupervisorConfig::default());

        let gate = supervisor.check_cycle_gate(dec!(2000)).await.unwrap();
        assert!(!gate.can_trade());
        assert!(matches!(gate, CycleGate::DrawdownTripped { .. }));
    }
}

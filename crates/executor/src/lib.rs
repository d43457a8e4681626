mod tiers;

use chrono::Utc;
use engine_core::{
    retry_transient, Decision, DecisionAction, EngineError, FeeModel, OrderPlacer, OrderSide,
    Position, PositionStatus, PriceSource, Store, Tier, Trade, TradeEvent, TradeEventType,
    TradeSide, TpTier, TradeType,
};
use risk_supervisor::RiskSupervisor;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

pub use tiers::{take_profit_levels, TierConfig, TierSizing};

const DCA_MIN_DROP_PCT: Decimal = dec!(0.03);
const ENTRY_COOLDOWN_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub tiers: TierConfig,
    pub max_concurrent_positions: usize,
    pub entry_cooldown_hours: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tiers: TierConfig::default(),
            max_concurrent_positions: 8,
            entry_cooldown_hours: ENTRY_COOLDOWN_HOURS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub executed: bool,
    pub reason: Option<String>,
}

impl ExecOutcome {
    fn not_executed(reason: impl Into<String>) -> Self {
        Self { executed: false, reason: Some(reason.into()) }
    }

    fn executed() -> Self {
        Self { executed: true, reason: None }
    }
}

pub struct Executor<'a> {
    price_source: &'a dyn PriceSource,
    order_placer: &'a dyn OrderPlacer,
    store: &'a dyn Store,
    fee_model: &'a dyn FeeModel,
    risk: &'a RiskSupervisor<'a>,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    pub fn new(
        price_source: &'a dyn PriceSource,
        order_placer: &'a dyn OrderPlacer,
        store: &'a dyn Store,
        fee_model: &'a dyn FeeModel,
        risk: &'a RiskSupervisor<'a>,
        config: ExecutorConfig,
    ) -> Self {
        Self { price_source, order_placer, store, fee_model, risk, config }
    }

    /// `Execute(decision, tier) -> { executed, reason }` (§4.4).
    pub async fn execute(
        &self,
        decision: &mut Decision,
        tier: Tier,
        total_capital: Decimal,
    ) -> Result<ExecOutcome, EngineError> {
        let outcome = match decision.action {
            DecisionAction::Buy => self.execute_buy(decision, tier, total_capital).await?,
            DecisionAction::Dca => self.execute_dca(decision, tier, total_capital).await?,
            DecisionAction::Sell | DecisionAction::PartialExit => {
                self.execute_exit(decision).await?
            }
            DecisionAction::Hold | DecisionAction::Pass | DecisionAction::Ignore => {
                ExecOutcome::not_executed(format!("{:?}: no state change", decision.action))
            }
        };

        if outcome.executed {
            decision.mark_executed();
        } else if let Some(reason) = &outcome.reason {
            decision.mark_not_executed(reason.clone());
        }
        self.store
            .update_decision_execution(decision.id, decision.executed, decision.execution_notes.clone())
            .await?;

        Ok(outcome)
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal, EngineError> {
        retry_transient("price_source", || self.price_source.get_price(symbol)).await
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<engine_core::OrderFill, EngineError> {
        retry_transient("order_placer", || {
            self.order_placer.place_order(symbol, side, quantity)
        })
        .await
    }

    async fn execute_buy(
        &self,
        decision: &Decision,
        tier: Tier,
        total_capital: Decimal,
    ) -> Result<ExecOutcome, EngineError> {
        let sizing = self.config.tiers.for_tier(tier);
        let requested_usd = decision.recommended_size_usd.unwrap_or(sizing.base_position_usd);

        if self.store.open_position(&decision.symbol).await?.is_some() {
            return Ok(ExecOutcome::not_executed("position already open for symbol"));
        }
        if !self.risk.can_reenter(&decision.symbol).await? {
            return Ok(ExecOutcome::not_executed("symbol within entry cooldown"));
        }

        let current_prices = self.price_source.get_all_prices().await.unwrap_or_default();
        let portfolio = self
            .store
            .portfolio_snapshot(total_capital, &current_prices, self.config.max_concurrent_positions)
            .await?;
        if portfolio.open_count >= self.config.max_concurrent_positions {
            return Ok(ExecOutcome::not_executed("max concurrent positions reached"));
        }
        if requested_usd > sizing.max_position_usd {
            return Ok(ExecOutcome::not_executed("requested size exceeds tier cap"));
        }
        if requested_usd > portfolio.available_capital_usd {
            return Ok(ExecOutcome::not_executed("insufficient available capital"));
        }

        let price = self.get_price(&decision.symbol).await?;
        let est_qty = requested_usd / price;

        let fill = self.place_order(&decision.symbol, OrderSide::Buy, est_qty).await?;
        let fee = self.fee_model.fee(fill.price, fill.executed_qty);
        let fill_cost = fill.cum_quote_qty + fee;

        let (tp1, tp2, tp3) = take_profit_levels(fill.price);
        let now = Utc::now();
        let position = Position {
            id: Uuid::new_v4(),
            symbol: decision.symbol.clone(),
            tier,
            status: PositionStatus::Open,
            entry_price: fill.price,
            avg_entry_price: fill.price,
            current_size: fill.executed_qty,
            total_cost: fill_cost,
            stop_loss_price: Position::stop_loss_for(fill.price, sizing.stop_pct),
            tp1_price: tp1,
            tp2_price: tp2,
            tp3_price: tp3,
            tp1_hit: false,
            tp2_hit: false,
            tp3_hit: false,
            dca_level: 0,
            remaining_qty: fill.executed_qty,
            max_unrealized_gain_percent: 0.0,
            max_unrealized_loss_percent: 0.0,
            entry_time: now,
            exit_time: None,
            exit_price: None,
            realized_pnl: Decimal::ZERO,
            realized_pnl_percent: 0.0,
            hold_hours: None,
            open_decision_id: decision.id,
            close_decision_id: None,
            partial_exits: 0,
            total_profit_taken: Decimal::ZERO,
        };

        let trade = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: TradeSide::Buy,
            trade_type: TradeType::Entry,
            price: fill.price,
            quantity: fill.executed_qty,
            amount: fill_cost,
            executed_at: now,
        };

        self.store.open_position_tx(&position, &trade).await?;
        self.store
            .enqueue_event(&TradeEvent::new(
                TradeEventType::Buy,
                Some(position.symbol.clone()),
                serde_json::json!({ "price": fill.price, "quantity": fill.executed_qty }),
            ))
            .await?;

        tracing::info!(
            symbol = %position.symbol,
            price = %fill.price,
            qty = %fill.executed_qty,
            "opened position"
        );
        Ok(ExecOutcome::executed())
    }

    async fn execute_dca(
        &self,
        decision: &Decision,
        tier: Tier,
        _total_capital: Decimal,
    ) -> Result<ExecOutcome, EngineError> {
        let sizing = self.config.tiers.for_tier(tier);
        if !sizing.dca_allowed {
            return Ok(ExecOutcome::not_executed("DCA not allowed for this tier"));
        }

        let Some(mut position) = self.store.open_position(&decision.symbol).await? else {
            return Ok(ExecOutcome::not_executed("no open position to DCA"));
        };
        if position.dca_level >= 2 {
            return Ok(ExecOutcome::not_executed("DCA level already at tier maximum"));
        }

        let price = self.get_price(&decision.symbol).await?;
        let drop_floor = position.avg_entry_price * (Decimal::ONE - DCA_MIN_DROP_PCT);
        if price > drop_floor {
            return Ok(ExecOutcome::not_executed("price not low enough below average entry for DCA"));
        }

        let requested_usd = decision.recommended_size_usd.unwrap_or(sizing.base_position_usd);
        let remaining_room = sizing.max_position_usd - position.total_cost;
        if remaining_room <= Decimal::ZERO {
            return Ok(ExecOutcome::not_executed("position already at tier max cost"));
        }
        let clamped_usd = requested_usd.min(remaining_room);

        let est_qty = clamped_usd / price;
        let fill = self.place_order(&decision.symbol, OrderSide::Buy, est_qty).await?;
        let fee = self.fee_model.fee(fill.price, fill.executed_qty);
        let fill_cost = fill.cum_quote_qty + fee;

        let new_total_cost = position.total_cost + fill_cost;
        let new_total_qty = position.current_size + fill.executed_qty;
        let new_avg_entry = new_total_cost / new_total_qty;
        let (tp1, tp2, tp3) = take_profit_levels(new_avg_entry);

        position.dca_level += 1;
        position.current_size = new_total_qty;
        position.remaining_qty = new_total_qty;
        position.total_cost = new_total_cost;
        position.avg_entry_price = new_avg_entry;
        position.tp1_price = tp1;
        position.tp2_price = tp2;
        position.tp3_price = tp3;

        let trade_type = if position.dca_level == 1 { TradeType::Dca1 } else { TradeType::Dca2 };
        let now = Utc::now();
        let trade = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: TradeSide::Buy,
            trade_type,
            price: fill.price,
            quantity: fill.executed_qty,
            amount: fill_cost,
            executed_at: now,
        };

        self.store.dca_position_tx(&position, &trade).await?;
        self.store
            .enqueue_event(&TradeEvent::new(
                TradeEventType::Dca,
                Some(position.symbol.clone()),
                serde_json::json!({ "level": position.dca_level, "avg_entry": new_avg_entry }),
            ))
            .await?;

        Ok(ExecOutcome::executed())
    }

    async fn execute_exit(&self, decision: &Decision) -> Result<ExecOutcome, EngineError> {
        let Some(mut position) = self.store.open_position(&decision.symbol).await? else {
            return Ok(ExecOutcome::not_executed("no open position to exit"));
        };

        let exit_percent = match decision.action {
            DecisionAction::Sell => 100.0,
            DecisionAction::PartialExit => decision.exit_percent.unwrap_or(100.0),
            _ => unreachable!("execute_exit only called for SELL/PARTIAL_EXIT"),
        };
        let exit_fraction = Decimal::from_f64_retain(exit_percent / 100.0).unwrap_or(Decimal::ONE);
        let exit_size = position.current_size * exit_fraction;

        let price = self.get_price(&decision.symbol).await?;
        let fill = self.place_order(&decision.symbol, OrderSide::Sell, exit_size).await?;
        let fee = self.fee_model.fee(fill.price, fill.executed_qty);
        let fill_value = fill.cum_quote_qty - fee;

        let partial_pnl = fill_value - position.avg_entry_price * fill.executed_qty;
        let now = Utc::now();
        let fully_closed = exit_percent >= 99.0;

        let trade_type = if fully_closed { TradeType::FullExit } else { TradeType::PartialExit };
        let trade = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: TradeSide::Sell,
            trade_type,
            price: fill.price,
            quantity: fill.executed_qty,
            amount: fill_value,
            executed_at: now,
        };

        if fully_closed {
            let total_realized = position.total_profit_taken + partial_pnl;
            position.status = PositionStatus::Closed;
            position.exit_time = Some(now);
            position.exit_price = Some(fill.price);
            position.realized_pnl = total_realized;
            position.realized_pnl_percent = if position.total_cost > Decimal::ZERO {
                (total_realized / position.total_cost * dec!(100))
                    .to_f64()
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            position.hold_hours = Some(
                now.signed_duration_since(position.entry_time).num_seconds() as f64 / 3600.0,
            );
            position.close_decision_id = Some(decision.id);
            position.current_size = Decimal::ZERO;
            position.remaining_qty = Decimal::ZERO;
        } else {
            position.current_size -= exit_size;
            position.remaining_qty = position.current_size;
            position.total_cost -= position.avg_entry_price * exit_size;
            position.partial_exits += 1;
            position.total_profit_taken += partial_pnl;
        }

        self.store.exit_position_tx(&position, &trade).await?;

        if fully_closed {
            if position.realized_pnl < Decimal::ZERO {
                self.risk.record_loss(&position.symbol, position.realized_pnl).await?;
            } else {
                self.risk.reset().await?;
            }
        }

        let event_type = if fully_closed { TradeEventType::Sell } else { TradeEventType::PartialExit };
        self.store
            .enqueue_event(&TradeEvent::new(
                event_type,
                Some(position.symbol.clone()),
                serde_json::json!({ "exit_percent": exit_percent, "pnl": partial_pnl }),
            ))
            .await?;

        Ok(ExecOutcome::executed())
    }

    /// Automatic TP1/TP2/TP3 exit (§4.4). TP1 takes 50% of current size, TP2
    /// takes 30% of current size, TP3 closes the position outright (P5: TP3
    /// hit implies status transitions to CLOSED in the same atomic unit).
    pub async fn execute_tp_exit(&self, symbol: &str, tier_hit: TpTier) -> Result<ExecOutcome, EngineError> {
        let Some(mut position) = self.store.open_position(symbol).await? else {
            return Ok(ExecOutcome::not_executed("no open position to take profit on"));
        };

        let exit_fraction = match tier_hit {
            TpTier::Tp1 if !position.tp1_hit => dec!(0.50),
            TpTier::Tp2 if !position.tp2_hit => dec!(0.30),
            TpTier::Tp3 if !position.tp3_hit => Decimal::ONE,
            _ => return Ok(ExecOutcome::not_executed("TP tier already hit")),
        };
        let fully_closed = matches!(tier_hit, TpTier::Tp3);
        let exit_size = position.current_size * exit_fraction;

        let fill = self.place_order(symbol, OrderSide::Sell, exit_size).await?;
        let fee = self.fee_model.fee(fill.price, fill.executed_qty);
        let fill_value = fill.cum_quote_qty - fee;
        let partial_pnl = fill_value - position.avg_entry_price * fill.executed_qty;
        let now = Utc::now();

        let trade = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: TradeSide::Sell,
            trade_type: tier_hit.trade_type(),
            price: fill.price,
            quantity: fill.executed_qty,
            amount: fill_value,
            executed_at: now,
        };

        match tier_hit {
            TpTier::Tp1 => position.tp1_hit = true,
            TpTier::Tp2 => position.tp2_hit = true,
            TpTier::Tp3 => position.tp3_hit = true,
        }

        if fully_closed {
            let total_realized = position.total_profit_taken + partial_pnl;
            position.status = PositionStatus::Closed;
            position.exit_time = Some(now);
            position.exit_price = Some(fill.price);
            position.realized_pnl = total_realized;
            position.realized_pnl_percent = if position.total_cost > Decimal::ZERO {
                (total_realized / position.total_cost * dec!(100))
                    .to_f64()
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            position.hold_hours = Some(
                now.signed_duration_since(position.entry_time).num_seconds() as f64 / 3600.0,
            );
            position.current_size = Decimal::ZERO;
            position.remaining_qty = Decimal::ZERO;
        } else {
            position.current_size -= exit_size;
            position.remaining_qty = position.current_size;
            position.total_cost -= position.avg_entry_price * exit_size;
            position.partial_exits += 1;
            position.total_profit_taken += partial_pnl;
        }

        self.store.exit_position_tx(&position, &trade).await?;

        if fully_closed {
            if position.realized_pnl < Decimal::ZERO {
                self.risk.record_loss(&position.symbol, position.realized_pnl).await?;
            } else {
                self.risk.reset().await?;
            }
        }

        let event_type = if fully_closed { TradeEventType::Sell } else { TradeEventType::PartialExit };
        self.store
            .enqueue_event(&TradeEvent::new(
                event_type,
                Some(position.symbol.clone()),
                serde_json::json!({ "tier": format!("{:?}", tier_hit), "pnl": partial_pnl }),
            ))
            .await?;

        Ok(ExecOutcome::executed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use engine_core::*;
    use risk_supervisor::RiskSupervisorConfig;
    use std::sync::Mutex;

    struct StubPriceSource(Decimal);

    #[async_trait]
    impl PriceSource for StubPriceSource {
        async fn get_price(&self, _symbol: &str) -> Result<Decimal, EngineError> { Ok(self.0) }
        async fn get_all_prices(&self) -> Result<std::collections::HashMap<String, Decimal>, EngineError> {
            Ok(Default::default())
        }
        async fn get_candles(&self, _s: &str, _i: &str, _l: u32) -> Result<Vec<Candle>, EngineError> { Ok(vec![]) }
    }

    struct StubOrderPlacer;

    #[async_trait]
    impl OrderPlacer for StubOrderPlacer {
        async fn place_order(&self, _symbol: &str, _side: OrderSide, quantity: Decimal) -> Result<OrderFill, EngineError> {
            Ok(OrderFill {
                price: dec!(100),
                executed_qty: quantity,
                cum_quote_qty: quantity * dec!(100),
                order_id: "PAPER_1".to_string(),
            })
        }
    }

    struct StubStore {
        open: Mutex<Option<Position>>,
        open_count: usize,
        available_capital: Decimal,
    }

    #[async_trait]
    impl Store for StubStore {
        async fn active_symbols(&self) -> Result<Vec<Symbol>, EngineError> { Ok(vec![]) }
        async fn insert_snapshots(&self, _s: &[IndicatorSnapshot]) -> Result<(), EngineError> { Ok(()) }
        async fn insert_signal(&self, _s: &Signal) -> Result<(), EngineError> { Ok(()) }
        async fn last_deep_evaluation(&self, _symbol: &str) -> Result<Option<DateTime<Utc>>, EngineError> { Ok(None) }
        async fn insert_decision(&self, _d: &Decision) -> Result<(), EngineError> { Ok(()) }
        async fn update_decision_execution(&self, _id: Uuid, _e: bool, _n: Option<String>) -> Result<(), EngineError> { Ok(()) }
        async fn open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError> {
            Ok(self.open.lock().unwrap().as_ref().filter(|p| p.symbol == symbol).cloned())
        }
        async fn open_positions(&self) -> Result<Vec<Position>, EngineError> { Ok(vec![]) }
        async fn closed_within(&self, _s: &str, _h: i64) -> Result<bool, EngineError> { Ok(false) }
        async fn open_position_tx(&self, p: &Position, _t: &Trade) -> Result<(), EngineError> {
            *self.open.lock().unwrap() = Some(p.clone());
            Ok(())
        }
        async fn dca_position_tx(&self, p: &Position, _t: &Trade) -> Result<(), EngineError> {
            *self.open.lock().unwrap() = Some(p.clone());
            Ok(())
        }
        async fn exit_position_tx(&self, p: &Position, _t: &Trade) -> Result<(), EngineError> {
            if p.is_open() {
                *self.open.lock().unwrap() = Some(p.clone());
            } else {
                *self.open.lock().unwrap() = None;
            }
            Ok(())
        }
        async fn portfolio_snapshot(
            &self,
            _c: Decimal,
            _prices: &std::collections::HashMap<String, Decimal>,
            _max_open: usize,
        ) -> Result<PortfolioSnapshot, EngineError> {
            Ok(PortfolioSnapshot {
                open_count: self.open_count,
                max_open: 8,
                invested_usd: Decimal::ZERO,
                available_capital_usd: self.available_capital,
                unrealized_pnl_usd: Decimal::ZERO,
                realized_pnl_usd: Decimal::ZERO,
                win_rate: 0.5,
                total_pnl_percent: 0.0,
            })
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

    fn sample_decision(action: DecisionAction, symbol: &str) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            action,
            confidence: 0.8,
            reasoning: "test".to_string(),
            risk_assessment: "moderate".to_string(),
            alternative_considered: None,
            recommended_price: Some(dec!(100)),
            recommended_size_usd: Some(dec!(200)),
            exit_percent: None,
            prompt_snapshot: String::new(),
            executed: false,
            execution_notes: None,
            outcome: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn buy_opens_position_with_stop_anchored_to_fill_price() {
        let price_source = StubPriceSource(dec!(100));
        let order_placer = StubOrderPlacer;
        let store = StubStore { open: Mutex::new(None), open_count: 1, available_capital: dec!(1000) };
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let mut decision = sample_decision(DecisionAction::Buy, "ETHUSDT");
        let outcome = executor.execute(&mut decision, Tier::Tier1, dec!(2000)).await.unwrap();

        assert!(outcome.executed);
        assert!(decision.executed);
        let position = store.open.lock().unwrap().clone().unwrap();
        assert_eq!(position.stop_loss_price, dec!(92.00));
        assert!(position.is_open());
    }

    #[tokio::test]
    async fn buy_rejected_when_at_max_concurrent_positions() {
        let price_source = StubPriceSource(dec!(100));
        let order_placer = StubOrderPlacer;
        let store = StubStore { open: Mutex::new(None), open_count: 8, available_capital: dec!(1000) };
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let mut decision = sample_decision(DecisionAction::Buy, "ETHUSDT");
        let outcome = executor.execute(&mut decision, Tier::Tier1, dec!(2000)).await.unwrap();

        assert!(!outcome.executed);
        assert!(store.open.lock().unwrap().is_none());
    }

    fn sample_position(avg_entry: Decimal, current_size: Decimal, total_cost: Decimal, stop: Decimal) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "SOLUSDT".to_string(),
            tier: Tier::Tier2,
            status: PositionStatus::Open,
            entry_price: avg_entry,
            avg_entry_price: avg_entry,
            current_size,
            total_cost,
            stop_loss_price: stop,
            tp1_price: avg_entry * dec!(1.05),
            tp2_price: avg_entry * dec!(1.08),
            tp3_price: avg_entry * dec!(1.12),
            tp1_hit: false,
            tp2_hit: false,
            tp3_hit: false,
            dca_level: 0,
            remaining_qty: current_size,
            max_unrealized_gain_percent: 0.0,
            max_unrealized_loss_percent: 0.0,
            entry_time: Utc::now(),
            exit_time: None,
            exit_price: None,
            realized_pnl: Decimal::ZERO,
            realized_pnl_percent: 0.0,
            hold_hours: None,
            open_decision_id: Uuid::new_v4(),
            close_decision_id: None,
            partial_exits: 0,
            total_profit_taken: Decimal::ZERO,
        }
    }

    struct StubOrderPlacerAt(Decimal);

    #[async_trait]
    impl OrderPlacer for StubOrderPlacerAt {
        async fn place_order(&self, _symbol: &str, _side: OrderSide, quantity: Decimal) -> Result<OrderFill, EngineError> {
            Ok(OrderFill {
                price: self.0,
                executed_qty: quantity,
                cum_quote_qty: quantity * self.0,
                order_id: "PAPER_dca".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn dca_lowers_average_entry_while_stop_stays_anchored() {
        // Scenario 2 (§8): price has dropped 5% (>= the 3% DCA floor), so the
        // fill lands below the existing average entry and pulls it down while
        // leaving the original stop untouched (P3).
        let price_source = StubPriceSource(dec!(95));
        let order_placer = StubOrderPlacerAt(dec!(95));
        let existing = sample_position(dec!(100), dec!(1), dec!(100), dec!(90));
        let store = StubStore { open: Mutex::new(Some(existing)), open_count: 1, available_capital: dec!(1000) };
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let mut decision = sample_decision(DecisionAction::Dca, "SOLUSDT");
        decision.recommended_size_usd = Some(dec!(95));
        let outcome = executor.execute(&mut decision, Tier::Tier2, dec!(2000)).await.unwrap();

        assert!(outcome.executed);
        let position = store.open.lock().unwrap().clone().unwrap();
        assert_eq!(position.dca_level, 1);
        assert_eq!(position.avg_entry_price, dec!(97.5));
        assert_eq!(position.stop_loss_price, dec!(90));
        assert_eq!(position.tp1_price, dec!(102.375));
    }

    #[tokio::test]
    async fn dca_refused_when_price_not_low_enough() {
        // Scenario 3 (§8): price has only dropped 2%, below the 3% DCA floor.
        let price_source = StubPriceSource(dec!(98));
        let order_placer = StubOrderPlacerAt(dec!(98));
        let existing = sample_position(dec!(100), dec!(1), dec!(100), dec!(90));
        let store = StubStore { open: Mutex::new(Some(existing)), open_count: 1, available_capital: dec!(1000) };
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let mut decision = sample_decision(DecisionAction::Dca, "SOLUSDT");
        decision.recommended_size_usd = Some(dec!(100));
        let outcome = executor.execute(&mut decision, Tier::Tier2, dec!(2000)).await.unwrap();

        assert!(!outcome.executed);
        assert!(decision.execution_notes.as_ref().unwrap().contains("not low enough"));
        let position = store.open.lock().unwrap().clone().unwrap();
        assert_eq!(position.dca_level, 0);
        assert_eq!(position.avg_entry_price, dec!(100));
    }

    #[tokio::test]
    async fn tp1_hit_takes_half_position_and_sets_flag() {
        let existing = sample_position(dec!(100), dec!(2), dec!(200), dec!(90));
        let tp1_price = existing.tp1_price;
        let store = StubStore { open: Mutex::new(Some(existing)), open_count: 1, available_capital: dec!(1000) };
        let price_source = StubPriceSource(tp1_price);
        let order_placer = StubOrderPlacerAt(tp1_price);
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let outcome = executor.execute_tp_exit("SOLUSDT", TpTier::Tp1).await.unwrap();

        assert!(outcome.executed);
        let position = store.open.lock().unwrap().clone().unwrap();
        assert!(position.tp1_hit);
        assert!(position.is_open());
        assert_eq!(position.current_size, dec!(1));
        assert_eq!(position.partial_exits, 1);
    }

    #[tokio::test]
    async fn tp3_hit_closes_position_fully() {
        let existing = sample_position(dec!(100), dec!(2), dec!(200), dec!(90));
        let tp3_price = existing.tp3_price;
        let store = StubStore { open: Mutex::new(Some(existing)), open_count: 1, available_capital: dec!(1000) };
        let price_source = StubPriceSource(tp3_price);
        let order_placer = StubOrderPlacerAt(tp3_price);
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let outcome = executor.execute_tp_exit("SOLUSDT", TpTier::Tp3).await.unwrap();

        assert!(outcome.executed);
        let position = store.open.lock().unwrap().clone().unwrap();
        assert!(position.tp3_hit);
        assert!(!position.is_open());
        assert_eq!(position.current_size, Decimal::ZERO);
    }

    #[tokio::test]
    async fn hold_marks_decision_not_executed_without_state_change() {
        let price_source = StubPriceSource(dec!(100));
        let order_placer = StubOrderPlacer;
        let store = StubStore { open: Mutex::new(None), open_count: 0, available_capital: dec!(1000) };
        let fee_model = ZeroFeeModel;
        let risk = RiskSupervisor::new(&store, RiskSupervisorConfig::default());
        let executor = Executor::new(&price_source, &order_placer, &store, &fee_model, &risk, ExecutorConfig::default());

        let mut decision = sample_decision(DecisionAction::Hold, "ETHUSDT");
        let outcome = executor.execute(&mut decision, Tier::Tier1, dec!(2000)).await.unwrap();

        assert!(!outcome.executed);
        assert!(decision.execution_notes.is_some());
    }
}

mod row;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{
    CircuitBreakerRow, Decision, EngineError, EngineSettings, EventStats, ExitScannerStatusRow,
    IndicatorSnapshot, LearningRule, Position, PortfolioSnapshot, PositionAnalysis, Signal, Store,
    Trade, TradeEvent, TradeEventType,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn store_err(context: &str, err: sqlx::Error) -> EngineError {
    EngineError::StoreFailure(format!("{context}: {err}"))
}

/// `Store` implementation against SQLite, following the teacher's
/// single-row-state-machine convention for `circuit_breaker` (explicit
/// columns, `ON CONFLICT DO UPDATE`) and its key-value/JSON-payload
/// convention (`state_manager.rs`) for the richer aggregates, to keep the
/// column count of `positions`/`signals`/`decisions` tractable.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| store_err("connect", e))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::StoreFailure(format!("migrate: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn active_symbols(&self) -> Result<Vec<engine_core::Symbol>, EngineError> {
        let rows = sqlx::query("SELECT code, display_name, tier, active FROM symbols WHERE active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("active_symbols", e))?;

        rows.into_iter()
            .map(|r| {
                let tier_raw: i64 = r.get("tier");
                let tier = engine_core::Tier::from_u8(tier_raw as u8)
                    .ok_or_else(|| EngineError::StoreFailure(format!("bad tier {tier_raw}")))?;
                Ok(engine_core::Symbol {
                    code: r.get("code"),
                    display_name: r.get("display_name"),
                    tier,
                    active: r.get::<i64, _>("active") != 0,
                })
            })
            .collect()
    }

    async fn insert_snapshots(&self, snapshots: &[IndicatorSnapshot]) -> Result<(), EngineError> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(|e| store_err("insert_snapshots begin", e))?;
        for snap in snapshots {
            let payload = serde_json::to_string(snap)
                .map_err(|e| EngineError::StoreFailure(format!("serialize snapshot: {e}")))?;
            sqlx::query(
                "INSERT INTO indicator_snapshots (symbol, captured_at, payload) VALUES (?, ?, ?)",
            )
            .bind(&snap.symbol)
            .bind(snap.captured_at.to_rfc3339())
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("insert_snapshots", e))?;
        }
        tx.commit().await.map_err(|e| store_err("insert_snapshots commit", e))?;
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<(), EngineError> {
        let payload = serde_json::to_string(signal)
            .map_err(|e| EngineError::StoreFailure(format!("serialize signal: {e}")))?;
        sqlx::query(
            "INSERT INTO signals (id, symbol, escalated, created_at, payload) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(signal.id.to_string())
        .bind(&signal.symbol)
        .bind(signal.escalated)
        .bind(signal.created_at.to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("insert_signal", e))?;
        Ok(())
    }

    async fn last_deep_evaluation(&self, symbol: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
        let row = sqlx::query("SELECT created_at FROM decisions WHERE symbol = ? ORDER BY created_at DESC LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("last_deep_evaluation", e))?;
        Ok(row.and_then(|r| {
            let s: String = r.get("created_at");
            DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))
        }))
    }

    async fn insert_decision(&self, decision: &Decision) -> Result<(), EngineError> {
        let payload = serde_json::to_string(decision)
            .map_err(|e| EngineError::StoreFailure(format!("serialize decision: {e}")))?;
        sqlx::query(
            "INSERT INTO decisions (id, signal_id, symbol, action, executed, created_at, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(decision.id.to_string())
        .bind(decision.signal_id.to_string())
        .bind(&decision.symbol)
        .bind(format!("{:?}", decision.action))
        .bind(decision.executed)
        .bind(decision.created_at.to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("insert_decision", e))?;
        Ok(())
    }

    async fn update_decision_execution(
        &self,
        decision_id: Uuid,
        executed: bool,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let row = sqlx::query("SELECT payload FROM decisions WHERE id = ?")
            .bind(decision_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("update_decision_execution fetch", e))?;
        let Some(row) = row else {
            return Err(EngineError::StoreFailure(format!("no decision {decision_id}")));
        };
        let payload: String = row.get("payload");
        let mut decision: Decision = serde_json::from_str(&payload)
            .map_err(|e| EngineError::StoreFailure(format!("deserialize decision: {e}")))?;
        decision.executed = executed;
        decision.execution_notes = notes;
        let new_payload = serde_json::to_string(&decision)
            .map_err(|e| EngineError::StoreFailure(format!("serialize decision: {e}")))?;
        sqlx::query("UPDATE decisions SET executed = ?, payload = ? WHERE id = ?")
            .bind(executed)
            .bind(new_payload)
            .bind(decision_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("update_decision_execution", e))?;
        Ok(())
    }

    async fn open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError> {
        let row = sqlx::query("SELECT payload FROM positions WHERE symbol = ? AND status = 'Open'")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("open_position", e))?;
        row.map(|r| row::decode_position(r.get("payload"))).transpose()
    }

    async fn open_positions(&self) -> Result<Vec<Position>, EngineError> {
        let rows = sqlx::query("SELECT payload FROM positions WHERE status = 'Open'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("open_positions", e))?;
        rows.into_iter().map(|r| row::decode_position(r.get("payload"))).collect()
    }

    async fn closed_within(&self, symbol: &str, hours: i64) -> Result<bool, EngineError> {
        let row = sqlx::query(
            "SELECT payload FROM positions WHERE symbol = ? AND status = 'Closed' ORDER BY entry_time DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("closed_within", e))?;
        let Some(row) = row else { return Ok(false) };
        let position = row::decode_position(row.get("payload"))?;
        let Some(exit_time) = position.exit_time else { return Ok(false) };
        Ok(Utc::now().signed_duration_since(exit_time).num_hours() < hours)
    }

    async fn open_position_tx(&self, position: &Position, trade: &Trade) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("open_position_tx begin", e))?;
        row::insert_position(&mut tx, position).await?;
        row::insert_trade(&mut tx, trade).await?;
        tx.commit().await.map_err(|e| store_err("open_position_tx commit", e))?;
        Ok(())
    }

    async fn dca_position_tx(&self, position: &Position, trade: &Trade) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("dca_position_tx begin", e))?;
        row::update_position(&mut tx, position).await?;
        row::insert_trade(&mut tx, trade).await?;
        tx.commit().await.map_err(|e| store_err("dca_position_tx commit", e))?;
        Ok(())
    }

    async fn exit_position_tx(&self, position: &Position, trade: &Trade) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("exit_position_tx begin", e))?;
        row::update_position(&mut tx, position).await?;
        row::insert_trade(&mut tx, trade).await?;
        tx.commit().await.map_err(|e| store_err("exit_position_tx commit", e))?;
        Ok(())
    }

    async fn portfolio_snapshot(
        &self,
        total_capital: Decimal,
        current_prices: &std::collections::HashMap<String, Decimal>,
        max_open: usize,
    ) -> Result<PortfolioSnapshot, EngineError> {
        let open = self.open_positions().await?;
        let invested: Decimal = open.iter().map(|p| p.total_cost).sum();
        let unrealized: Decimal = open
            .iter()
            .map(|p| {
                current_prices
                    .get(&p.symbol)
                    .map(|price| (*price - p.avg_entry_price) * p.current_size)
                    .unwrap_or(Decimal::ZERO)
            })
            .sum();
        let closed_rows = sqlx::query("SELECT payload FROM positions WHERE status = 'Closed'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("portfolio_snapshot", e))?;
        let closed: Vec<Position> = closed_rows
            .into_iter()
            .map(|r| row::decode_position(r.get("payload")))
            .collect::<Result<_, _>>()?;
        let realized: Decimal = closed.iter().map(|p| p.realized_pnl).sum();
        let wins = closed.iter().filter(|p| p.realized_pnl > Decimal::ZERO).count();
        let win_rate = if closed.is_empty() {
            0.0
        } else {
            wins as f64 / closed.len() as f64
        };
        let total_pnl_percent = if total_capital > Decimal::ZERO {
            (realized.to_f64().unwrap_or(0.0) / total_capital.to_f64().unwrap_or(1.0)) * 100.0
        } else {
            0.0
        };
        Ok(PortfolioSnapshot {
            open_count: open.len(),
            max_open,
            invested_usd: invested,
            available_capital_usd: total_capital - invested,
            unrealized_pnl_usd: unrealized,
            realized_pnl_usd: realized,
            win_rate,
            total_pnl_percent,
        })
    }

    async fn closed_trades(&self, limit: u32) -> Result<Vec<Trade>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, position_id, symbol, side, trade_type, price, quantity, amount, executed_at
             FROM trades ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("closed_trades", e))?;
        rows.into_iter().map(row::decode_trade).collect()
    }

    async fn enqueue_event(&self, event: &TradeEvent) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO trade_events (id, event_type, symbol, data, posted, created_at, posted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(format!("{:?}", event.event_type))
        .bind(&event.symbol)
        .bind(event.data.to_string())
        .bind(event.posted)
        .bind(event.created_at.to_rfc3339())
        .bind(event.posted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("enqueue_event", e))?;
        Ok(())
    }

    async fn events(&self, only_unposted: bool, limit: u32) -> Result<Vec<TradeEvent>, EngineError> {
        let sql = if only_unposted {
            "SELECT * FROM trade_events WHERE posted = 0 ORDER BY created_at ASC LIMIT ?"
        } else {
            "SELECT * FROM trade_events ORDER BY created_at DESC LIMIT ?"
        };
        let rows = sqlx::query(sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("events", e))?;
        rows.into_iter().map(row::decode_event).collect()
    }

    async fn mark_events_posted(&self, ids: &[Uuid]) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("mark_events_posted begin", e))?;
        for id in ids {
            sqlx::query("UPDATE trade_events SET posted = 1, posted_at = ? WHERE id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| store_err("mark_events_posted", e))?;
        }
        tx.commit().await.map_err(|e| store_err("mark_events_posted commit", e))?;
        Ok(())
    }

    async fn circuit_breaker(&self) -> Result<CircuitBreakerRow, EngineError> {
        let row = sqlx::query("SELECT * FROM circuit_breaker WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("circuit_breaker", e))?;
        row::decode_circuit_breaker(row)
    }

    async fn record_loss(
        &self,
        symbol: &str,
        pnl: Decimal,
        consecutive_to_activate: u32,
        cooldown_hours: i64,
    ) -> Result<CircuitBreakerRow, EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("record_loss begin", e))?;
        let row = sqlx::query("SELECT consecutive_losses FROM circuit_breaker WHERE id = 1")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| store_err("record_loss fetch", e))?;
        let consecutive: i64 = row.get("consecutive_losses");
        let new_consecutive = consecutive + 1;
        let activate = new_consecutive as u32 >= consecutive_to_activate;
        let now = Utc::now();
        let reactivates_at = activate.then(|| now + chrono::Duration::hours(cooldown_hours));

        sqlx::query(
            "UPDATE circuit_breaker SET consecutive_losses = ?, is_active = ?, activated_at = ?,
             reactivates_at = ?, last_loss_symbol = ?, last_loss_pnl = ? WHERE id = 1",
        )
        .bind(new_consecutive)
        .bind(activate)
        .bind(activate.then(|| now.to_rfc3339()))
        .bind(reactivates_at.map(|t| t.to_rfc3339()))
        .bind(symbol)
        .bind(pnl.to_f64().unwrap_or(0.0))
        .execute(&mut *tx)
        .await
        .map_err(|e| store_err("record_loss update", e))?;
        tx.commit().await.map_err(|e| store_err("record_loss commit", e))?;
        self.circuit_breaker().await
    }

    async fn reset_circuit_breaker(&self) -> Result<(), EngineError> {
        sqlx::query("UPDATE circuit_breaker SET consecutive_losses = 0 WHERE id = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("reset_circuit_breaker", e))?;
        Ok(())
    }

    async fn clear_circuit_breaker_if_expired(&self) -> Result<CircuitBreakerRow, EngineError> {
        let cb = self.circuit_breaker().await?;
        if cb.is_active {
            if let Some(reactivates_at) = cb.reactivates_at {
                if reactivates_at <= Utc::now() {
                    sqlx::query("UPDATE circuit_breaker SET is_active = 0 WHERE id = 1")
                        .execute(&self.pool)
                        .await
                        .map_err(|e| store_err("clear_circuit_breaker_if_expired", e))?;
                    return self.circuit_breaker().await;
                }
            }
        }
        Ok(cb)
    }

    async fn top_learning_rules(&self, limit: u32) -> Result<Vec<LearningRule>, EngineError> {
        let rows = sqlx::query("SELECT * FROM learning_rules ORDER BY weight DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("top_learning_rules", e))?;
        rows.into_iter().map(row::decode_learning_rule).collect()
    }

    async fn signals(&self, limit: u32) -> Result<Vec<Signal>, EngineError> {
        let rows = sqlx::query("SELECT payload FROM signals ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("signals", e))?;
        rows.into_iter()
            .map(|r| {
                let payload: String = r.get("payload");
                serde_json::from_str(&payload)
                    .map_err(|e| EngineError::StoreFailure(format!("deserialize signal: {e}")))
            })
            .collect()
    }

    async fn decisions(&self, limit: u32) -> Result<Vec<Decision>, EngineError> {
        let rows = sqlx::query("SELECT payload FROM decisions ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("decisions", e))?;
        rows.into_iter()
            .map(|r| {
                let payload: String = r.get("payload");
                serde_json::from_str(&payload)
                    .map_err(|e| EngineError::StoreFailure(format!("deserialize decision: {e}")))
            })
            .collect()
    }

    async fn is_paused(&self) -> Result<bool, EngineError> {
        let row = sqlx::query("SELECT value FROM engine_state WHERE key = 'paused'")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("is_paused", e))?;
        Ok(row.map(|r| r.get::<String, _>("value") == "true").unwrap_or(false))
    }

    async fn pause_trading(&self) -> Result<(), EngineError> {
        sqlx::query("INSERT INTO engine_state (key, value) VALUES ('paused', 'true')
                      ON CONFLICT(key) DO UPDATE SET value = 'true'")
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("pause_trading", e))?;
        Ok(())
    }

    async fn resume_trading(&self) -> Result<(), EngineError> {
        sqlx::query("INSERT INTO engine_state (key, value) VALUES ('paused', 'false')
                      ON CONFLICT(key) DO UPDATE SET value = 'false'")
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("resume_trading", e))?;
        Ok(())
    }

    async fn get_event_stats(&self) -> Result<EventStats, EngineError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(posted), 0) AS posted FROM trade_events",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_err("get_event_stats", e))?;
        let total: i64 = row.get("total");
        let posted: i64 = row.get("posted");
        Ok(EventStats {
            total: total as u64,
            posted: posted as u64,
            unposted: (total - posted) as u64,
        })
    }

    async fn get_exit_scanner_status(&self) -> Result<ExitScannerStatusRow, EngineError> {
        let open_positions = self.open_positions().await?.len();
        let last = sqlx::query(
            "SELECT symbol, created_at FROM trade_events WHERE event_type = 'ExitScannerAction'
             ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("get_exit_scanner_status", e))?;
        let (last_action_symbol, last_action_at) = match last {
            Some(r) => {
                let symbol: String = r.get("symbol");
                let created_at: String = r.get("created_at");
                let at = DateTime::parse_from_rfc3339(&created_at).ok().map(|d| d.with_timezone(&Utc));
                (Some(symbol), at)
            }
            None => (None, None),
        };
        Ok(ExitScannerStatusRow {
            open_positions,
            last_action_symbol,
            last_action_at,
        })
    }

    async fn analyze_position(
        &self,
        symbol: &str,
        current_price: Decimal,
    ) -> Result<Option<PositionAnalysis>, EngineError> {
        let Some(position) = self.open_position(symbol).await? else {
            return Ok(None);
        };
        let snapshot_row = sqlx::query(
            "SELECT payload FROM indicator_snapshots WHERE symbol = ? ORDER BY captured_at DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("analyze_position snapshot", e))?;
        let latest_snapshot = snapshot_row
            .map(|r| {
                let payload: String = r.get("payload");
                serde_json::from_str::<IndicatorSnapshot>(&payload)
                    .map_err(|e| EngineError::StoreFailure(format!("deserialize snapshot: {e}")))
            })
            .transpose()?;
        let unrealized_pnl_usd = (current_price - position.avg_entry_price) * position.current_size;
        let unrealized_pnl_percent = if position.avg_entry_price > Decimal::ZERO {
            ((current_price - position.avg_entry_price) / position.avg_entry_price)
                .to_f64()
                .unwrap_or(0.0)
                * 100.0
        } else {
            0.0
        };
        Ok(Some(PositionAnalysis {
            position,
            latest_snapshot,
            unrealized_pnl_usd,
            unrealized_pnl_percent,
        }))
    }

    async fn close_position(
        &self,
        symbol: &str,
        exit_price: Decimal,
        justification: &str,
    ) -> Result<(), EngineError> {
        if justification.trim().len() < 10 {
            return Err(EngineError::PreconditionViolated(
                "close_position justification must be at least 10 characters".to_string(),
            ));
        }
        let Some(position) = self.open_position(symbol).await? else {
            return Err(EngineError::PreconditionViolated(format!("no open position for {symbol}")));
        };
        close_one_position(self, position, exit_price, justification).await?;
        Ok(())
    }

    async fn close_all_positions(
        &self,
        current_prices: &std::collections::HashMap<String, Decimal>,
        justification: &str,
    ) -> Result<u32, EngineError> {
        if justification.trim().len() < 10 {
            return Err(EngineError::PreconditionViolated(
                "close_all_positions justification must be at least 10 characters".to_string(),
            ));
        }
        let open = self.open_positions().await?;
        let mut closed = 0u32;
        for position in open {
            let Some(price) = current_prices.get(&position.symbol).copied() else {
                continue;
            };
            close_one_position(self, position, price, justification).await?;
            closed += 1;
        }
        Ok(closed)
    }

    async fn update_settings(&self, settings: &EngineSettings) -> Result<EngineSettings, EngineError> {
        let mut current = self.get_settings().await?;
        if settings.max_concurrent_positions.is_some() {
            current.max_concurrent_positions = settings.max_concurrent_positions;
        }
        if settings.entry_cooldown_hours.is_some() {
            current.entry_cooldown_hours = settings.entry_cooldown_hours;
        }
        if settings.max_drawdown_percent.is_some() {
            current.max_drawdown_percent = settings.max_drawdown_percent;
        }
        let payload = serde_json::to_string(&current)
            .map_err(|e| EngineError::StoreFailure(format!("serialize settings: {e}")))?;
        sqlx::query(
            "INSERT INTO engine_state (key, value) VALUES ('settings', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("update_settings", e))?;
        Ok(current)
    }

    async fn get_settings(&self) -> Result<EngineSettings, EngineError> {
        let row = sqlx::query("SELECT value FROM engine_state WHERE key = 'settings'")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("get_settings", e))?;
        match row {
            Some(r) => {
                let payload: String = r.get("value");
                serde_json::from_str(&payload)
                    .map_err(|e| EngineError::StoreFailure(format!("deserialize settings: {e}")))
            }
            None => Ok(EngineSettings::default()),
        }
    }
}

/// Shared close-out path for `close_position`/`close_all_positions`: marks the
/// position fully closed at `exit_price`, inserts the matching Manual trade,
/// and enqueues a System event carrying the justification for the audit trail.
async fn close_one_position(
    store: &SqliteStore,
    mut position: Position,
    exit_price: Decimal,
    justification: &str,
) -> Result<(), EngineError> {
    let now = Utc::now();
    let realized_pnl = (exit_price - position.avg_entry_price) * position.current_size;
    let realized_pnl_percent = if position.avg_entry_price > Decimal::ZERO {
        ((exit_price - position.avg_entry_price) / position.avg_entry_price)
            .to_f64()
            .unwrap_or(0.0)
            * 100.0
    } else {
        0.0
    };
    let hold_hours = now.signed_duration_since(position.entry_time).num_seconds() as f64 / 3600.0;

    let trade = Trade {
        id: Uuid::new_v4(),
        position_id: position.id,
        symbol: position.symbol.clone(),
        side: engine_core::TradeSide::Sell,
        trade_type: engine_core::TradeType::Manual,
        price: exit_price,
        quantity: position.current_size,
        amount: exit_price * position.current_size,
        executed_at: now,
    };

    position.status = engine_core::PositionStatus::Closed;
    position.exit_time = Some(now);
    position.exit_price = Some(exit_price);
    position.realized_pnl = realized_pnl;
    position.realized_pnl_percent = realized_pnl_percent;
    position.hold_hours = Some(hold_hours);
    position.current_size = Decimal::ZERO;
    position.remaining_qty = Decimal::ZERO;

    store.exit_position_tx(&position, &trade).await?;

    let event = TradeEvent::new(
        TradeEventType::System,
        Some(position.symbol.clone()),
        serde_json::json!({
            "action": "manual_close",
            "exit_price": exit_price.to_string(),
            "realized_pnl": realized_pnl.to_string(),
            "justification": justification,
        }),
    );
    store.enqueue_event(&event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{PositionStatus, Tier};
    use rust_decimal_macros::dec;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_position(symbol: &str) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            tier: Tier::Tier1,
            status: PositionStatus::Open,
            entry_price: dec!(100),
            avg_entry_price: dec!(100),
            current_size: dec!(1),
            total_cost: dec!(100),
            stop_loss_price: dec!(85),
            tp1_price: dec!(105),
            tp2_price: dec!(108),
            tp3_price: dec!(112),
            tp1_hit: false,
            tp2_hit: false,
            tp3_hit: false,
            dca_level: 0,
            remaining_qty: dec!(1),
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

    fn sample_trade(position_id: Uuid, symbol: &str) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            position_id,
            symbol: symbol.to_string(),
            side: engine_core::TradeSide::Buy,
            trade_type: engine_core::TradeType::Entry,
            price: dec!(100),
            quantity: dec!(1),
            amount: dec!(100),
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_position_round_trips() {
        let store = memory_store().await;
        let position = sample_position("ETHUSDT");
        let trade = sample_trade(position.id, "ETHUSDT");
        store.open_position_tx(&position, &trade).await.unwrap();

        let fetched = store.open_position("ETHUSDT").await.unwrap().unwrap();
        assert_eq!(fetched.id, position.id);
        assert_eq!(fetched.avg_entry_price, dec!(100));
    }

    #[tokio::test]
    async fn circuit_breaker_activates_after_threshold() {
        let store = memory_store().await;
        store.record_loss("ADAUSDT", dec!(-5), 3, 4).await.unwrap();
        store.record_loss("OPUSDT", dec!(-3), 3, 4).await.unwrap();
        let cb = store.record_loss("LINKUSDT", dec!(-2), 3, 4).await.unwrap();
        assert!(cb.is_active);
        assert_eq!(cb.consecutive_losses, 3);
        assert!(cb.reactivates_at.is_some());
    }

    #[tokio::test]
    async fn reset_clears_consecutive_losses() {
        let store = memory_store().await;
        store.record_loss("ADAUSDT", dec!(-5), 5, 4).await.unwrap();
        store.reset_circuit_breaker().await.unwrap();
        let cb = store.circuit_breaker().await.unwrap();
        assert_eq!(cb.consecutive_losses, 0);
    }
}

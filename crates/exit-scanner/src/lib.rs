use std::collections::HashMap;

use chrono::{DateTime, Utc};
use engine_core::{BollingerPosition, Crossover, IndicatorSnapshot, Position, TpTier, TrendDirection};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct ExitScannerConfig {
    pub interval_cycles: u32,
    pub urgency_threshold: f64,
    pub critical_threshold: f64,
    pub cooldown_minutes: i64,
}

impl Default for ExitScannerConfig {
    fn default() -> Self {
        Self {
            interval_cycles: 3,
            urgency_threshold: 40.0,
            critical_threshold: 70.0,
            cooldown_minutes: 30,
        }
    }
}

/// Per-symbol exit cooldown state, owned by the orchestrator across cycles —
/// same shape as the scanner's `ScannerState`.
#[derive(Default)]
pub struct ExitScannerState {
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl ExitScannerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cooldown(&mut self, symbol: &str, at: DateTime<Utc>) {
        self.cooldowns.insert(symbol.to_string(), at);
    }

    fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>, cooldown_minutes: i64) -> bool {
        match self.cooldowns.get(symbol) {
            Some(last) => now.signed_duration_since(*last).num_minutes() < cooldown_minutes,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExitCandidate {
    pub symbol: String,
    pub score: f64,
    pub factors: Vec<String>,
}

/// A position whose current price has crossed an unhit TP level (§4.4 TP1/TP2/TP3).
#[derive(Debug, Clone)]
pub struct TpCrossing {
    pub symbol: String,
    pub tier: TpTier,
}

pub struct ExitScanner {
    config: ExitScannerConfig,
}

impl ExitScanner {
    pub fn new(config: ExitScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitScannerConfig {
        &self.config
    }

    /// `RunExitScan(cfg) -> { candidates[] }` (§4.5).
    pub fn scan(
        &self,
        positions: &[Position],
        snapshots: &HashMap<String, IndicatorSnapshot>,
        current_prices: &HashMap<String, Decimal>,
        state: &ExitScannerState,
        now: DateTime<Utc>,
    ) -> Vec<ExitCandidate> {
        let mut candidates = Vec::new();

        for position in positions.iter().filter(|p| p.is_open()) {
            let Some(snapshot) = snapshots.get(&position.symbol) else {
                continue;
            };
            let price = current_prices
                .get(&position.symbol)
                .copied()
                .unwrap_or(snapshot.price);

            let (score, factors) = self.urgency_score(position, snapshot, price, now);
            if score < self.config.urgency_threshold {
                continue;
            }

            let bypasses_cooldown = score >= self.config.critical_threshold;
            if !bypasses_cooldown
                && state.in_cooldown(&position.symbol, now, self.config.cooldown_minutes)
            {
                continue;
            }

            candidates.push(ExitCandidate { symbol: position.symbol.clone(), score, factors });
        }

        candidates
    }

    /// TP1/TP2/TP3 crossing check, independent of the urgency-score/cooldown
    /// path above: run every cycle against every open position, not gated by
    /// `interval_cycles` or `ExitScannerState`, mirroring the always-on
    /// take-profit scan the teacher runs alongside its stop/TP loop.
    pub fn tp_crossings(
        &self,
        positions: &[Position],
        current_prices: &HashMap<String, Decimal>,
    ) -> Vec<TpCrossing> {
        let mut crossings = Vec::new();
        for position in positions.iter().filter(|p| p.is_open()) {
            let Some(price) = current_prices.get(&position.symbol).copied() else {
                continue;
            };
            let tier = if !position.tp3_hit && price >= position.tp3_price {
                Some(TpTier::Tp3)
            } else if !position.tp2_hit && price >= position.tp2_price {
                Some(TpTier::Tp2)
            } else if !position.tp1_hit && price >= position.tp1_price {
                Some(TpTier::Tp1)
            } else {
                None
            };
            if let Some(tier) = tier {
                crossings.push(TpCrossing { symbol: position.symbol.clone(), tier });
            }
        }
        crossings
    }

    fn urgency_score(
        &self,
        position: &Position,
        snapshot: &IndicatorSnapshot,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> (f64, Vec<String>) {
        let mut score = 0.0;
        let mut factors = Vec::new();

        let rsi = snapshot.rsi_value;
        if rsi > 85.0 {
            score += 30.0;
            factors.push(format!("RSI {rsi:.1} > 85"));
        } else if rsi > 75.0 {
            score += 15.0;
            factors.push(format!("RSI {rsi:.1} in 75-85"));
        } else if rsi > 70.0 {
            score += 5.0;
            factors.push(format!("RSI {rsi:.1} in 70-75"));
        }

        let gain_percent = if position.avg_entry_price > Decimal::ZERO {
            ((price - position.avg_entry_price) / position.avg_entry_price * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        if gain_percent > 20.0 {
            score += 25.0;
            factors.push(format!("P&L {gain_percent:.1}% > 20%"));
        } else if gain_percent > 10.0 {
            score += 15.0;
            factors.push(format!("P&L {gain_percent:.1}% in 10-20%"));
        } else if gain_percent > 5.0 {
            score += 10.0;
            factors.push(format!("P&L {gain_percent:.1}% in 5-10%"));
        } else if gain_percent < -10.0 {
            score += 20.0;
            factors.push(format!("P&L {gain_percent:.1}% < -10%"));
        } else if gain_percent < -5.0 {
            score += 10.0;
            factors.push(format!("P&L {gain_percent:.1}% in -10% to -5%"));
        }

        if position.max_unrealized_gain_percent > 3.0 {
            let drawdown = position.max_unrealized_gain_percent - gain_percent;
            if drawdown > 10.0 {
                score += 30.0;
                factors.push(format!("drawdown from peak {drawdown:.1}% > 10%"));
            } else if drawdown > 5.0 {
                score += 20.0;
                factors.push(format!("drawdown from peak {drawdown:.1}% in 5-10%"));
            } else if drawdown > 3.0 {
                score += 10.0;
                factors.push(format!("drawdown from peak {drawdown:.1}% in 3-5%"));
            }
        }

        let held_hours = now.signed_duration_since(position.entry_time).num_seconds() as f64 / 3600.0;
        if held_hours > 48.0 {
            score += 15.0;
            factors.push(format!("held {held_hours:.1}h > 48h"));
        } else if held_hours > 24.0 {
            score += 10.0;
            factors.push(format!("held {held_hours:.1}h in 24-48h"));
        } else if held_hours > 12.0 {
            score += 5.0;
            factors.push(format!("held {held_hours:.1}h in 12-24h"));
        }

        if snapshot.bollinger.position == BollingerPosition::Upper {
            score += 10.0;
            factors.push("price at upper Bollinger band".to_string());
        }

        if snapshot.crossover == Crossover::Bearish {
            score += 15.0;
            factors.push("MACD bearish crossover".to_string());
        } else if snapshot.crossover == Crossover::BearishTrend {
            score += 5.0;
            factors.push("MACD bearish trend".to_string());
        }

        if snapshot.trend.direction == TrendDirection::Bearish {
            score += 10.0;
            factors.push("trend bearish".to_string());
        }

        (score, factors)
    }
}

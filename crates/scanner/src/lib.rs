use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use engine_core::{
    BollingerWidth, Crossover, EmaSignal, IndicatorEngine, IndicatorSnapshot, Symbol, Tier,
    TriggerKind, TriggeredSignal,
};
use tokio::sync::Semaphore;

const MAX_CONCURRENT_FETCHES: usize = 3;

#[derive(Debug, Clone)]
pub struct ScannerThresholds {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_spike_ratio: f64,
}

impl Default for ScannerThresholds {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_spike_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub interval_minutes: u64,
    pub signal_cooldown_minutes: i64,
    pub thresholds: ScannerThresholds,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            signal_cooldown_minutes: 30,
            thresholds: ScannerThresholds::default(),
        }
    }
}

/// Per-cycle scanner state owned by the orchestrator (§9 design note: "these
/// become fields on a ScannerState / CycleState object owned by the
/// orchestrator"). None of this needs to survive a restart.
#[derive(Default)]
pub struct ScannerState {
    prev: HashMap<String, IndicatorSnapshot>,
    cooldowns: HashMap<(String, TriggerKind), DateTime<Utc>>,
}

impl ScannerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_snapshot(&self, symbol: &str) -> Option<IndicatorSnapshot> {
        self.prev.get(symbol).cloned()
    }
}

pub struct ScanResult {
    pub snapshots: Vec<IndicatorSnapshot>,
    pub triggered: Vec<TriggeredSignal>,
    pub duration_ms: u64,
}

pub struct Scanner<E: IndicatorEngine> {
    engine: Arc<E>,
    config: ScannerConfig,
}

impl<E: IndicatorEngine> Scanner<E> {
    pub fn new(engine: Arc<E>, config: ScannerConfig) -> Self {
        Self { engine, config }
    }

    /// `Scan(cfg) -> { snapshots[], triggered[], duration_ms }` (§4.1).
    pub async fn scan(
        &self,
        symbols: &[Symbol],
        state: &mut ScannerState,
        open_positions: &std::collections::HashSet<String>,
    ) -> ScanResult {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));

        let mut handles = Vec::with_capacity(symbols.len());
        for symbol in symbols.iter().cloned() {
            let engine = Arc::clone(&self.engine);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let result = engine.snapshot(&symbol.code).await;
                (symbol, result)
            }));
        }

        let mut snapshots = Vec::new();
        let mut triggered = Vec::new();
        let now = Utc::now();

        for handle in handles {
            let (symbol, result) = match handle.await {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(error = %e, "scanner task panicked");
                    continue;
                }
            };

            let snapshot = match result {
                Ok(s) => s,
                Err(e) => {
                    // Failure policy (§4.1): log and skip; prev[] left unchanged.
                    tracing::warn!(symbol = %symbol.code, error = %e, "snapshot fetch failed, skipping");
                    continue;
                }
            };

            let prev = state.prev.get(&symbol.code);
            let mut crossed = detect_transitions(prev, &snapshot, &self.config.thresholds);
            crossed.retain(|kind| self.not_in_cooldown(state, &symbol.code, *kind, now));

            if !crossed.is_empty() {
                for kind in &crossed {
                    state
                        .cooldowns
                        .insert((symbol.code.clone(), *kind), now);
                }
                triggered.push(TriggeredSignal {
                    symbol: symbol.code.clone(),
                    tier: symbol.tier,
                    price: snapshot.price,
                    snapshot: snapshot.clone(),
                    thresholds_crossed: crossed,
                    has_position: open_positions.contains(&symbol.code),
                    position_snapshot: None,
                });
            }

            state.prev.insert(symbol.code.clone(), snapshot.clone());
            snapshots.push(snapshot);
        }

        ScanResult {
            snapshots,
            triggered,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn not_in_cooldown(
        &self,
        state: &ScannerState,
        symbol: &str,
        kind: TriggerKind,
        now: DateTime<Utc>,
    ) -> bool {
        match state.cooldowns.get(&(symbol.to_string(), kind)) {
            Some(last) => {
                now.signed_duration_since(*last).num_minutes() >= self.config.signal_cooldown_minutes
            }
            None => true,
        }
    }
}

/// Returns the set of transition kinds that became true between `prev` and
/// `cur` (§4.1 transition catalogue). Returns empty when `prev` is `None`
/// (calibration cycle, P6).
fn detect_transitions(
    prev: Option<&IndicatorSnapshot>,
    cur: &IndicatorSnapshot,
    thresholds: &ScannerThresholds,
) -> Vec<TriggerKind> {
    let Some(prev) = prev else {
        return Vec::new();
    };

    let mut out = Vec::new();

    if prev.rsi_value >= thresholds.rsi_oversold && cur.rsi_value < thresholds.rsi_oversold {
        out.push(TriggerKind::RsiOversold);
    }
    if prev.rsi_value <= thresholds.rsi_overbought && cur.rsi_value > thresholds.rsi_overbought {
        out.push(TriggerKind::RsiOverbought);
    }

    if cur.crossover == Crossover::Bullish && prev.crossover != Crossover::Bullish {
        out.push(TriggerKind::MacdBullishCrossover);
    }
    if cur.crossover == Crossover::Bearish && prev.crossover != Crossover::Bearish {
        out.push(TriggerKind::MacdBearishCrossover);
    }

    if cur.ema_signal == EmaSignal::Bullish && prev.ema_signal != EmaSignal::Bullish {
        out.push(TriggerKind::EmaBullishCrossover);
    }
    if cur.ema_signal == EmaSignal::Bearish && prev.ema_signal != EmaSignal::Bearish {
        out.push(TriggerKind::EmaBearishCrossover);
    }

    if prev.volume_ratio < thresholds.volume_spike_ratio && cur.volume_ratio >= thresholds.volume_spike_ratio {
        out.push(TriggerKind::VolumeSpike);
    }

    if prev.bollinger.width != BollingerWidth::Narrow && cur.bollinger.width == BollingerWidth::Narrow {
        out.push(TriggerKind::BbSqueeze);
    }

    use engine_core::BollingerPosition::*;
    if cur.bollinger.position == Lower && prev.bollinger.position != Lower {
        out.push(TriggerKind::BbLowerTouch);
    }
    if cur.bollinger.position == Upper && prev.bollinger.position != Upper {
        out.push(TriggerKind::BbUpperTouch);
    }

    use engine_core::TrendDirection::*;
    if cur.trend.direction == Bullish && prev.trend.direction != Bullish {
        out.push(TriggerKind::TrendTurnedBullish);
    }
    if cur.trend.direction == Bearish && prev.trend.direction != Bearish {
        out.push(TriggerKind::TrendTurnedBearish);
    }
    out
}

use std::time::Instant;

/// Structured per-cycle telemetry, grounded on the corpus's `AgentMetrics`
/// (§2.2 "Supplemented features").
pub struct EngineMetrics {
    pub cycles_run: u64,
    pub triggers_found: u64,
    pub signals_escalated: u64,
    pub decisions_made: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub exit_candidates_found: u64,
    pub circuit_breaker_skips: u64,
    pub drawdown_skips: u64,

    pub last_scan_duration_ms: u64,
    pub last_decide_duration_ms: u64,
    pub last_execute_duration_ms: u64,
    pub last_total_duration_ms: u64,

    log_interval_cycles: u64,
}

impl EngineMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            triggers_found: 0,
            signals_escalated: 0,
            decisions_made: 0,
            trades_executed: 0,
            trades_failed: 0,
            exit_candidates_found: 0,
            circuit_breaker_skips: 0,
            drawdown_skips: 0,
            last_scan_duration_ms: 0,
            last_decide_duration_ms: 0,
            last_execute_duration_ms: 0,
            last_total_duration_ms: 0,
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_total_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;
        if self.log_interval_cycles > 0 && self.cycles_run.is_multiple_of(self.log_interval_cycles) {
            self.log_metrics();
        }
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            triggers_found = self.triggers_found,
            signals_escalated = self.signals_escalated,
            decisions_made = self.decisions_made,
            trades_executed = self.trades_executed,
            trades_failed = self.trades_failed,
            exit_candidates_found = self.exit_candidates_found,
            circuit_breaker_skips = self.circuit_breaker_skips,
            drawdown_skips = self.drawdown_skips,
            last_cycle_ms = self.last_total_duration_ms,
            last_scan_ms = self.last_scan_duration_ms,
            last_decide_ms = self.last_decide_duration_ms,
            last_execute_ms = self.last_execute_duration_ms,
            "cycle summary"
        );
    }
}

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use engine_core::NewsSource;
use exit_scanner::ExitScannerState;
use scanner::ScannerState;

const NEWS_CACHE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Process-local state carried across ticks, none of which survives a
/// restart (§9 design note: "these become fields on a `CycleState` object
/// owned by the orchestrator"). The news cache is owned separately by
/// `main` (see `CachedNewsSource`) rather than as a field here: it's
/// borrowed for the whole run by the `DecisionMaker`'s `NewsSource`, while
/// this struct is re-borrowed `&mut` every cycle for the scanner state.
pub struct CycleState {
    pub scanner: ScannerState,
    pub exit_scanner: ExitScannerState,
    pub last_exit_scan_cycle: u64,
}

impl CycleState {
    pub fn new() -> Self {
        Self {
            scanner: ScannerState::new(),
            exit_scanner: ExitScannerState::new(),
            last_exit_scan_cycle: 0,
        }
    }
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps an inner `NewsSource` with a 4-hour per-symbol TTL cache (§5 shared
/// resources: "the news cache 4 hours"), mirroring the scanner's own
/// process-local cooldown maps rather than anything the `NewsSource`
/// implementor does.
pub struct CachedNewsSource {
    entries: DashMap<String, (Instant, String)>,
}

impl CachedNewsSource {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub async fn get(&self, inner: &dyn NewsSource, symbol: &str, coin_name: &str, max_items: u32) -> String {
        if let Some(entry) = self.entries.get(symbol) {
            if entry.0.elapsed() < NEWS_CACHE_TTL {
                return entry.1.clone();
            }
        }
        let text = inner.get(symbol, coin_name, max_items).await;
        self.entries.insert(symbol.to_string(), (Instant::now(), text.clone()));
        text
    }
}

impl Default for CachedNewsSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a `CachedNewsSource` + its inner source into a plain `NewsSource`
/// so it can be handed to `DecisionMaker::new` without threading the cache
/// through every call site.
pub struct CyclingNewsSource<'a> {
    pub inner: &'a dyn NewsSource,
    pub cache: &'a CachedNewsSource,
}

#[async_trait]
impl<'a> NewsSource for CyclingNewsSource<'a> {
    async fn get(&self, symbol: &str, coin_name: &str, max_items: u32) -> String {
        self.cache.get(self.inner, symbol, coin_name, max_items).await
    }
}

use serde::Serialize;

/// Running counters for one slot cache.
///
/// Plain counters only: no wall-clock values, so snapshots taken from a
/// replayed event sequence are reproducible.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub reconcile_passes: u64,
    pub loads_started: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub evictions: u64,
    /// Completions whose timestamp had been evicted while in flight.
    pub discarded_completions: u64,
    /// Progress reports for a load or slot the cache no longer tracks.
    pub stale_progress: u64,
    pub points_loaded: u64,
    pub invariant_violations: u64,
}

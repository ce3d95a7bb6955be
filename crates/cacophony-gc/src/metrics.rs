//! Collection metrics and statistics.

use std::cell::Cell;
use std::time::Duration;

/// Statistics from the most recent `run_gc` cycle.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the last collection.
    pub duration: Duration,
    /// Number of bytes reclaimed (occupied before minus occupied after).
    pub bytes_reclaimed: usize,
    /// Number of bytes still occupied by survivors after the cycle.
    pub bytes_surviving: usize,
    /// Number of objects reclaimed.
    pub objects_reclaimed: usize,
    /// Number of objects surviving.
    pub objects_surviving: usize,
    /// Total collections run on this thread since process start.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            total_collections: 0,
        }
    }
}

thread_local! {
    static LAST_METRICS: Cell<GcMetrics> = const { Cell::new(GcMetrics::new()) };
    static TOTAL_COLLECTIONS: Cell<usize> = const { Cell::new(0) };
}

/// Get metrics from this thread's last `run_gc` cycle.
#[must_use]
pub fn last_gc_metrics() -> GcMetrics {
    LAST_METRICS.with(Cell::get)
}

/// Record metrics for a just-completed cycle, returning the finalized
/// value (with `total_collections` filled in) for the caller to hand
/// back to whoever requested the collection.
pub fn record_metrics(metrics: GcMetrics) -> GcMetrics {
    TOTAL_COLLECTIONS.with(|c| c.set(c.get() + 1));
    let mut metrics = metrics;
    metrics.total_collections = TOTAL_COLLECTIONS.with(Cell::get);
    LAST_METRICS.with(|m| m.set(metrics));
    metrics
}

/// Reset metrics bookkeeping (test isolation only).
pub fn reset_for_testing() {
    TOTAL_COLLECTIONS.with(|c| c.set(0));
    LAST_METRICS.with(|m| m.set(GcMetrics::new()));
}

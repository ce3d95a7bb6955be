//! Collection cycle orchestration (spec §4.5).
//!
//! `Collector` owns no state of its own — it sequences the walker's mark
//! pass, the allocator's compaction, and the walker's remap pass, exactly
//! in the order `mark -> cleanup -> remap` the spec pseudocode prescribes.
//! Ported from `original_source/lib_cacophony/gc/gc.cpp::runGc`; shaped
//! after the donor's `gc/gc.rs::collect` as the single entry point that
//! bundles a cycle's phases together and records [`GcMetrics`].

use std::time::Instant;

use crate::layout::WordPtr;
use crate::metrics::{record_metrics, GcMetrics};
use crate::page::PagedAllocator;
use crate::walker::ObjectGraphWalker;

/// Stateless coordinator for a single collection cycle.
pub struct Collector;

impl Collector {
    /// Run one collection cycle rooted at `fp`: mark, compact, remap.
    ///
    /// # Safety
    ///
    /// `fp` must be a live frame pointer whose transitive reference chain
    /// (stack and heap) is well-formed per spec §3's invariants.
    pub unsafe fn run_gc(walker: &mut ObjectGraphWalker, allocator: &mut PagedAllocator, fp: WordPtr) -> GcMetrics {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::span_collection();

        let start = Instant::now();
        let (objects_before, bytes_before) = allocator.metrics_snapshot();

        // SAFETY: forwarded to caller's contract.
        let alive = unsafe { walker.mark(fp) };
        let objects_surviving = alive.len();

        let relocation = allocator.cleanup(&alive);

        // SAFETY: forwarded to caller's contract; `relocation` maps every
        // evacuated survivor to its new, live address.
        unsafe { walker.remap(fp, relocation) };

        let bytes_after = allocator.total_occupied();
        let metrics = GcMetrics {
            duration: start.elapsed(),
            bytes_reclaimed: bytes_before.saturating_sub(bytes_after),
            bytes_surviving: bytes_after,
            objects_reclaimed: objects_before.saturating_sub(objects_surviving),
            objects_surviving,
            total_collections: 0, // filled in by record_metrics
        };

        #[cfg(feature = "tracing")]
        crate::tracing::log_collection_end(metrics.objects_reclaimed, metrics.objects_surviving, metrics.bytes_reclaimed);

        record_metrics(metrics)
    }
}

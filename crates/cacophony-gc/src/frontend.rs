//! Allocation-triggered collection (spec §4.4).
//!
//! `AllocatorFrontend` is the thin layer compiled code actually calls
//! into: every `alloc_struct` bumps a counter and, once it reaches
//! `gc_wait`, runs a full collection cycle before serving the request.
//! Grounded in `original_source/libcacophony.c`'s `alloc_struct`, which
//! keeps a static counter against the `GC_WAIT` environment knob; shaped
//! after the donor's `gc/gc.rs::maybe_collect` trigger check.

use crate::collector::Collector;
use crate::layout::{zero_reference_slots, WordPtr};
use crate::metrics::GcMetrics;
use crate::outline::Outline;
use crate::page::PagedAllocator;
use crate::walker::ObjectGraphWalker;

/// Number of allocations between collections when none is configured
/// explicitly (spec §9 Open Question, resolved here).
pub const DEFAULT_GC_WAIT: usize = 10;

/// Counts allocations and triggers collection cycles at the configured
/// cadence.
pub struct AllocatorFrontend {
    gc_wait: usize,
    alloc_count: usize,
}

impl AllocatorFrontend {
    /// Create a frontend that collects once every `gc_wait` allocations.
    ///
    /// `gc_wait == 0` disables automatic triggering entirely (collection
    /// then only runs when requested explicitly).
    #[must_use]
    pub const fn new(gc_wait: usize) -> Self {
        Self { gc_wait, alloc_count: 0 }
    }

    /// Allocations served since this frontend was created.
    #[must_use]
    pub const fn alloc_count(&self) -> usize {
        self.alloc_count
    }

    /// Allocate a new object described by `outline`, running a collection
    /// first if the trigger threshold has been reached (spec §4.4).
    ///
    /// Returns the data pointer (the word after the outline slot) of the
    /// freshly allocated, zeroed object.
    ///
    /// # Safety
    ///
    /// `fp` must be a live frame pointer whose transitive reference chain
    /// is well-formed; `outline` must outlive every object allocated with
    /// it (compiler-emitted outlines are `'static`).
    pub unsafe fn alloc_struct(
        &mut self,
        allocator: &mut PagedAllocator,
        walker: &mut ObjectGraphWalker,
        fp: WordPtr,
        outline: &'static Outline,
    ) -> WordPtr {
        self.alloc_count += 1;
        if self.gc_wait != 0 && self.alloc_count % self.gc_wait == 0 {
            // SAFETY: forwarded to caller's contract.
            unsafe { Collector::run_gc(walker, allocator, fp) };
        }

        let storage = allocator.allocate(outline.total_size_bytes());
        // SAFETY: `storage` is freshly reserved, `1 + outline.n_words()`
        // words, exclusively owned by this call.
        unsafe {
            storage.write(outline.as_ptr() as u64);
            let data = WordPtr::new_unchecked(storage.add(1));
            zero_reference_slots(data, outline, false);
            data
        }
    }

    /// Force a collection cycle regardless of the trigger cadence.
    ///
    /// # Safety
    ///
    /// Same as [`Self::alloc_struct`].
    pub unsafe fn force_collect(&mut self, allocator: &mut PagedAllocator, walker: &mut ObjectGraphWalker, fp: WordPtr) -> GcMetrics {
        // SAFETY: forwarded to caller's contract.
        unsafe { Collector::run_gc(walker, allocator, fp) }
    }
}

impl Default for AllocatorFrontend {
    fn default() -> Self {
        Self::new(DEFAULT_GC_WAIT)
    }
}

//! Process-wide runtime state (spec §9 Design Notes).
//!
//! A single `Runtime` composes the allocator, the walker, and the
//! allocation-triggered frontend behind a thread-local cell, mirroring
//! the donor's `thread_local! { static HEAP: RefCell<Heap> }` /
//! `with_heap` pattern in `heap.rs`. The design is strictly single
//! threaded (spec Non-goals rule out concurrent collection), so a
//! `RefCell` is enough; there is no call for `parking_lot` or atomics
//! here.

use std::cell::RefCell;

use crate::frontend::{AllocatorFrontend, DEFAULT_GC_WAIT};
use crate::layout::WordPtr;
use crate::metrics::GcMetrics;
use crate::outline::Outline;
use crate::page::{PagedAllocator, DEFAULT_REGULAR_PAGE_SIZE};
use crate::walker::ObjectGraphWalker;

/// Tuning knobs for a [`Runtime`], overriding the spec's compile-time
/// defaults (mirrors the donor's `IncrementalConfig` struct).
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Byte size of a regular page.
    pub regular_page_size: usize,
    /// Allocations between automatic collections; `0` disables the
    /// automatic trigger.
    pub gc_wait: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { regular_page_size: DEFAULT_REGULAR_PAGE_SIZE, gc_wait: DEFAULT_GC_WAIT }
    }
}

/// Composes every piece of process-wide GC state the ABI layer needs.
pub struct Runtime {
    allocator: PagedAllocator,
    walker: ObjectGraphWalker,
    frontend: AllocatorFrontend,
    stack_bottom: Option<WordPtr>,
}

impl Runtime {
    fn new(config: RuntimeConfig) -> Self {
        // A placeholder stack bottom; overwritten by `set_stack_bottom`
        // before any frame is ever walked. Dangling but never
        // dereferenced: `walker` only reads it for pointer comparison
        // until `stack_bottom` is installed for real.
        let placeholder = WordPtr::dangling();
        Self {
            allocator: PagedAllocator::with_regular_page_size(config.regular_page_size),
            walker: ObjectGraphWalker::new(placeholder),
            frontend: AllocatorFrontend::new(config.gc_wait),
            stack_bottom: None,
        }
    }

    /// Install the bottom-of-stack frame pointer (spec §6.4,
    /// `initialize_gc`). Installed unconditionally at startup per the
    /// resolved Open Question in spec §9: there is no "uninitialized"
    /// runtime state once `initialize_gc` has run.
    pub fn set_stack_bottom(&mut self, fp: WordPtr) {
        self.walker.set_stack_bottom(fp);
        self.stack_bottom = Some(fp);
    }

    /// Panics unless `initialize_gc`/[`Self::set_stack_bottom`] has
    /// installed a bottom frame. `fp` itself is supplied by the caller at
    /// each call site (spec §4.4/§4.5/§6.1) — it is the *current* frame
    /// pointer, which is a different, deeper value on every nested call,
    /// not the one-time-installed `stack_bottom` the walker stops its
    /// caller-link descent at.
    fn require_stack_bottom_installed(&self) {
        self.stack_bottom.expect("initialize_gc must run before any allocation or collection");
    }

    /// Allocate a new object, possibly triggering a collection first.
    ///
    /// `fp` is the caller's current frame pointer (the root of this
    /// call's reference traversal), not the installed stack bottom.
    ///
    /// # Safety
    ///
    /// `outline` must be a valid, `'static` compiler-emitted outline;
    /// `fp` must be a live frame pointer reachable from the installed
    /// stack bottom through the usual saved-frame-pointer chain.
    pub unsafe fn alloc_struct(&mut self, fp: WordPtr, outline: &'static Outline) -> WordPtr {
        self.require_stack_bottom_installed();
        // SAFETY: forwarded to caller's contract.
        unsafe { self.frontend.alloc_struct(&mut self.allocator, &mut self.walker, fp, outline) }
    }

    /// Force a collection cycle rooted at `fp`, the caller's current
    /// frame pointer.
    ///
    /// # Safety
    ///
    /// Same as [`Self::alloc_struct`].
    pub unsafe fn run_gc(&mut self, fp: WordPtr) -> GcMetrics {
        self.require_stack_bottom_installed();
        // SAFETY: forwarded to caller's contract.
        unsafe { self.frontend.force_collect(&mut self.allocator, &mut self.walker, fp) }
    }

    /// Total bytes currently occupied across every owned page.
    #[must_use]
    pub fn total_occupied(&self) -> usize {
        self.allocator.total_occupied()
    }

    /// The allocator's page list, for introspection (test tooling and
    /// embedders that report heap shape); tail last, same as
    /// [`PagedAllocator::pages`].
    #[must_use]
    pub fn allocator(&self) -> &PagedAllocator {
        &self.allocator
    }
}

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new(RuntimeConfig::default()));
}

/// Run `f` against this thread's runtime.
pub fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|cell| f(&mut cell.borrow_mut()))
}

/// Replace this thread's runtime with a freshly configured one (test
/// tooling and embedders that need non-default page sizes or GC_WAIT).
pub fn reset_runtime(config: RuntimeConfig) {
    RUNTIME.with(|cell| *cell.borrow_mut() = Runtime::new(config));
}

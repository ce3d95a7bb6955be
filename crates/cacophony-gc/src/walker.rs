//! Stack-and-heap object graph traversal.
//!
//! Discovers live objects by walking outward from the current stack frame,
//! following typed references described by outlines, and — in remap mode —
//! rewriting every reference through a relocation map as it goes (spec
//! §4.2). Shaped after the donor's `Visitor`/`GcVisitor` split in
//! `trace.rs` (one traversal, two modes selected by a `kind`/`remap_mode`
//! flag) and ported directly from
//! `original_source/lib_cacophony/gc/gc.cpp::objectTraversal::traverseObjects`.

use std::collections::{HashMap, HashSet};

use crate::layout::{outline_of, slot_addr, WordPtr};

/// Walks the reachable object graph from a frame pointer, either to
/// collect the live set (`mark`) or to rewrite references through a
/// relocation map (`remap`).
pub struct ObjectGraphWalker {
    /// The frame whose data pointer marks the bottom of the call stack;
    /// installed once at startup (spec §6.4) and never followed past.
    stack_bottom: WordPtr,
    visited: HashSet<WordPtr>,
    remap_mode: bool,
    relocation: HashMap<WordPtr, WordPtr>,
}

impl ObjectGraphWalker {
    /// Create a walker that recognizes `stack_bottom` as the end of the
    /// call-frame chain.
    #[must_use]
    pub fn new(stack_bottom: WordPtr) -> Self {
        Self { stack_bottom, visited: HashSet::new(), remap_mode: false, relocation: HashMap::new() }
    }

    /// Replace the installed bottom-of-stack pointer.
    pub fn set_stack_bottom(&mut self, stack_bottom: WordPtr) {
        self.stack_bottom = stack_bottom;
    }

    /// Mark pass: walk from `fp`, returning every reachable heap data
    /// pointer.
    ///
    /// # Safety
    ///
    /// `fp` must be a live frame pointer whose outline and reference chain
    /// (transitively, through every reachable object) are valid.
    pub unsafe fn mark(&mut self, fp: WordPtr) -> HashSet<WordPtr> {
        self.visited.clear();
        self.remap_mode = false;
        self.relocation.clear();
        // SAFETY: forwarded to caller's contract.
        unsafe { self.visit(fp, true) };
        self.visited.clone()
    }

    /// Remap pass: walk from `fp` again, rewriting every reference slot
    /// whose current value is a key of `relocation`.
    ///
    /// # Safety
    ///
    /// Same as [`Self::mark`]; additionally every value in `relocation`
    /// must be a live data pointer.
    pub unsafe fn remap(&mut self, fp: WordPtr, relocation: HashMap<WordPtr, WordPtr>) {
        self.visited.clear();
        self.remap_mode = true;
        self.relocation = relocation;
        // SAFETY: forwarded to caller's contract.
        unsafe { self.visit(fp, true) };
        self.relocation.clear();
    }

    /// # Safety
    ///
    /// `ptr` must be a live object data pointer or frame pointer matching
    /// `is_frame`, per [`crate::layout::outline_of`]'s contract.
    unsafe fn visit(&mut self, ptr: WordPtr, is_frame: bool) {
        if !is_frame {
            self.visited.insert(ptr);
        }

        // SAFETY: forwarded to caller's contract.
        let outline = unsafe { outline_of(ptr, is_frame) };
        let is_bottom_frame = is_frame && ptr == self.stack_bottom;

        for offset in outline.reference_offsets() {
            if is_bottom_frame && offset == 0 {
                // Invariant 5: the bottom frame's slot 0 is never followed.
                continue;
            }

            // SAFETY: outline flagged `offset` as a live reference slot.
            let slot = unsafe { slot_addr(ptr, offset, is_frame) };
            // SAFETY: `slot` is live per the above.
            let mut raw = unsafe { *slot };
            if raw == 0 {
                continue;
            }

            if self.remap_mode {
                // SAFETY: `raw` is non-null, so it names a live data pointer.
                let key = unsafe { WordPtr::new_unchecked(raw as *mut u64) };
                if let Some(&new_target) = self.relocation.get(&key) {
                    raw = new_target.as_ptr() as u64;
                    // SAFETY: `slot` is live per the above.
                    unsafe {
                        *slot = raw;
                    }
                }
            }

            // SAFETY: `raw` is non-null.
            let target = unsafe { WordPtr::new_unchecked(raw as *mut u64) };
            let next_is_frame = is_frame && offset == 0;
            if next_is_frame {
                // The caller-frame chain is linear: visited unconditionally.
                // SAFETY: forwarded to caller's contract.
                unsafe { self.visit(target, true) };
            } else if !self.visited.contains(&target) {
                // SAFETY: forwarded to caller's contract.
                unsafe { self.visit(target, false) };
            }
        }
    }
}

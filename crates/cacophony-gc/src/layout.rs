//! Shared address arithmetic for heap objects and stack frames.
//!
//! Spec §3: a heap object occupies `[outline][word 0]..[word N-1]` with the
//! data pointer at the start of the data words; a stack frame is laid out
//! in the opposite direction, with slot `i` at `fp - i` and its outline at
//! `fp + 1`. Both shapes are walked by the same traversal, so the
//! direction-dependent address math lives here rather than duplicated in
//! the walker and the allocator.

use std::ptr::NonNull;

use crate::outline::Outline;

/// A word address: either a heap object's data pointer or a stack frame
/// pointer. Which one it is, is tracked alongside it by callers (the
/// walker's `is_frame` flag) rather than encoded in the type, since the
/// same recursion visits both.
pub type WordPtr = NonNull<u64>;

/// # Safety
///
/// `ptr` must be a live data pointer (`is_frame == false`) or frame
/// pointer (`is_frame == true`) with a valid outline at the corresponding
/// offset.
#[must_use]
pub unsafe fn outline_of(ptr: WordPtr, is_frame: bool) -> &'static Outline {
    let raw = ptr.as_ptr();
    // SAFETY: caller guarantees the outline slot is live.
    let outline_slot = unsafe { if is_frame { raw.add(1) } else { raw.sub(1) } };
    // SAFETY: caller guarantees `outline_slot` holds a valid outline pointer.
    let outline_ptr = unsafe { *outline_slot } as *const u64;
    // SAFETY: forwarded to `Outline::from_raw`'s contract.
    unsafe { Outline::from_raw(outline_ptr) }
}

/// Address of slot `offset`: `ptr + offset` for heap objects, `ptr -
/// offset` for frames (spec §3, §4.2 step 4).
///
/// # Safety
///
/// The resulting address must lie within the object's or frame's storage.
#[must_use]
pub unsafe fn slot_addr(ptr: WordPtr, offset: usize, is_frame: bool) -> *mut u64 {
    let raw = ptr.as_ptr();
    // SAFETY: forwarded to caller's contract.
    unsafe {
        if is_frame {
            raw.sub(offset)
        } else {
            raw.add(offset)
        }
    }
}

/// Zero every reference slot an outline flags, given the object/frame's
/// base pointer and direction.
///
/// Used both by `AllocatorFrontend` (new objects must read zero in every
/// reference slot before compiled code writes them) and by `clean_refs`
/// (frame reference slots must read null on function entry).
///
/// # Safety
///
/// Same as [`slot_addr`]: every flagged slot must be valid to write.
pub unsafe fn zero_reference_slots(ptr: WordPtr, outline: &Outline, is_frame: bool) {
    for offset in outline.reference_offsets() {
        // SAFETY: forwarded to caller's contract.
        unsafe {
            *slot_addr(ptr, offset, is_frame) = 0;
        }
    }
}

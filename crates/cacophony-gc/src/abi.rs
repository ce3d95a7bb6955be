//! C ABI surface linked into compiled Cacophony output (spec §6).
//!
//! Every function here is a direct Rust port of a foreign function from
//! `original_source/libcacophony.c` / `lib_cacophony/libcacophony.cpp`,
//! kept under the same names and signatures so generated code can call
//! into this crate exactly as it called into the original C runtime.

use std::cell::Cell;
use std::io::Write as _;

use crate::layout::WordPtr;
use crate::outline::Outline;
use crate::runtime::with_runtime;

/// Print an integer followed by a newline (`original_source/libcacophony.c::write_int`).
#[no_mangle]
pub extern "C" fn write_int(x: i64) {
    println!("{x}");
}

/// Print a single character with no trailing newline (`write_char`).
///
/// Writes the raw byte directly rather than going through `char`/`print!`:
/// `ch` values above `0x7F` are not ASCII, and formatting them as a `char`
/// would re-encode them as a multi-byte UTF-8 sequence instead of the
/// single raw byte `original_source/libcacophony.c`'s `printf("%c", ch)`
/// emits.
#[no_mangle]
pub extern "C" fn write_char(ch: std::ffi::c_char) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(&[ch as u8]);
    let _ = stdout.flush();
}

/// Read a whitespace-delimited integer from standard input, echoing it
/// to standard error (`read_int`'s debug trace).
#[no_mangle]
pub extern "C" fn read_int() -> i64 {
    use std::io::Read as _;
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    let stdin = std::io::stdin();
    let mut lock = stdin.lock();
    loop {
        if lock.read_exact(&mut byte).is_err() {
            break;
        }
        if byte[0].is_ascii_whitespace() {
            if buf.is_empty() {
                continue;
            }
            break;
        }
        buf.push(byte[0]);
    }
    let text = String::from_utf8_lossy(&buf);
    let value: i64 = text.trim().parse().unwrap_or(0);

    #[cfg(feature = "tracing")]
    crate::tracing::log_read_int(value);
    #[cfg(not(feature = "tracing"))]
    eprintln!("read {value}");

    value
}

/// Allocate `count` untyped bytes directly from the system allocator,
/// bypassing the paged heap entirely (`alloc`, used by compiled code for
/// scratch buffers the collector never scans).
///
/// # Safety
///
/// The returned pointer must be freed with the matching deallocator the
/// embedder expects; this crate never frees it.
#[no_mangle]
pub unsafe extern "C" fn alloc(count: i64) -> *mut std::ffi::c_void {
    assert!(count >= 0, "negative allocation size");
    // SAFETY: `count` is non-negative; `System` handles the zero case.
    unsafe { std::alloc::alloc(std::alloc::Layout::from_size_align_unchecked(count as usize, 8)) as *mut std::ffi::c_void }
}

/// Read a single word through a raw pointer (`get_mem`).
///
/// # Safety
///
/// `ptr` must be valid for reads of one `i64`.
#[no_mangle]
pub unsafe extern "C" fn get_mem(ptr: *const i64) -> i64 {
    // SAFETY: forwarded to caller's contract.
    unsafe { *ptr }
}

/// Write a single word through a raw pointer (`put_mem`).
///
/// # Safety
///
/// `ptr` must be valid for writes of one `i64`.
#[no_mangle]
pub unsafe extern "C" fn put_mem(ptr: *mut i64, val: i64) {
    // SAFETY: forwarded to caller's contract.
    unsafe {
        *ptr = val;
    }
}

/// Verify the x86-64 System V stack alignment invariant (`%rsp % 16 ==
/// 8` at a `call` site) and abort with status 50 if it is violated
/// (`check_rsp`).
///
/// # Safety
///
/// Must be called from a context where reading the current stack
/// pointer is meaningful, i.e. compiled Cacophony code, not arbitrary
/// Rust call sites with unrelated frame layouts.
#[no_mangle]
#[cfg(target_arch = "x86_64")]
pub unsafe extern "C" fn check_rsp() {
    let rsp: u64;
    // SAFETY: reads the stack pointer without side effects.
    unsafe {
        std::arch::asm!("mov {}, rsp", out(reg) rsp);
    }
    if rsp % 16 != 8 {
        #[cfg(feature = "tracing")]
        crate::tracing::log_check_rsp_violation(rsp);
        std::process::exit(50);
    }
}

/// Non-x86-64 targets have no equivalent calling-convention invariant to
/// check; compiled Cacophony output only ever targets x86-64, so this is
/// a no-op rather than a real check.
#[no_mangle]
#[cfg(not(target_arch = "x86_64"))]
pub extern "C" fn check_rsp() {}

/// Zero every reference slot in the current stack frame described by
/// `outline`, matching the donor's `clean_refs` convention of taking its
/// arguments explicitly rather than inlining the address arithmetic
/// into hand-written assembly (spec §9 Design Notes).
///
/// # Safety
///
/// `fp` must be a live frame pointer whose `outline` accurately
/// describes its slots.
#[no_mangle]
pub unsafe extern "C" fn clean_refs(fp: *mut u64, outline: *const u64) {
    let fp = WordPtr::new(fp).expect("null frame pointer");
    // SAFETY: forwarded to caller's contract.
    let outline = unsafe { Outline::from_raw(outline) };
    // SAFETY: forwarded to caller's contract.
    unsafe {
        crate::layout::zero_reference_slots(fp, outline, true);
    }
}

thread_local! {
    static RAND_SEED: Cell<u64> = const { Cell::new(17) };
}

const RAND_MULTIPLIER: u64 = 16807;
const RAND_MOD: u64 = 2_147_483_647;

/// Deterministic inclusive-range LCG, matching `original_source`'s
/// `randint` bit for bit (seed 17, multiplier 16807, modulus
/// `2^31 - 1`) so generated test programs get reproducible output.
#[no_mangle]
pub extern "C" fn randint(l: i64, r: i64) -> i64 {
    let next = RAND_SEED.with(|seed| {
        let value = (seed.get() * RAND_MULTIPLIER) % RAND_MOD;
        seed.set(value);
        value
    });
    (next % (r - l + 1) as u64) as i64 + l
}

/// Terminate the process with status 1 if `b` is zero (`cassert`).
#[no_mangle]
pub extern "C" fn cassert(b: i64) {
    if b == 0 {
        std::process::exit(1);
    }
}

/// Install the bottom-of-stack frame pointer before any allocation or
/// collection runs (spec §6.5, supplemented from
/// `original_source/lib_cacophony/gc/gc.h`).
///
/// # Safety
///
/// `stack_bottom` must be a live frame pointer that remains valid for
/// the rest of the process's lifetime — the caller's very first frame.
#[no_mangle]
pub unsafe extern "C" fn initialize_gc(stack_bottom: *mut u64) {
    let fp = WordPtr::new(stack_bottom).expect("null stack bottom");
    with_runtime(|rt| rt.set_stack_bottom(fp));
}

/// Allocate a new heap object described by `outline`, rooted through
/// `fp` (`alloc_struct`). Triggers a collection first if the configured
/// allocation cadence has been reached.
///
/// # Safety
///
/// `outline` must be a live, compiler-emitted outline; `fp` must be the
/// caller's current frame pointer, reachable from the installed stack
/// bottom through the usual saved-frame-pointer chain.
#[no_mangle]
pub unsafe extern "C" fn alloc_struct(outline: *const u64, fp: *mut u64) -> *mut u64 {
    let fp = WordPtr::new(fp).expect("null frame pointer");
    // SAFETY: forwarded to caller's contract.
    let outline = unsafe { Outline::from_raw(outline) };
    with_runtime(|rt| {
        // SAFETY: forwarded to caller's contract.
        unsafe { rt.alloc_struct(fp, outline) }.as_ptr()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn randint_is_deterministic_and_in_range() {
        RAND_SEED.with(|seed| seed.set(17));
        let values: Vec<i64> = (0..5).map(|_| randint(1, 6)).collect();
        for v in &values {
            assert!((1..=6).contains(v));
        }
        RAND_SEED.with(|seed| seed.set(17));
        let replay: Vec<i64> = (0..5).map(|_| randint(1, 6)).collect();
        assert_eq!(values, replay);
    }

    #[test]
    fn clean_refs_zeroes_only_flagged_slots() {
        unsafe {
            let outline = Outline::leaked(2, [1]);
            let mut storage = [0u64; 3];
            storage[0] = 0xAAAA;
            storage[1] = 0xBBBB;
            storage[2] = outline.as_ptr() as u64;
            let fp = WordPtr::new(storage.as_mut_ptr().add(1)).unwrap();
            // slot 0 is fp itself (storage[1]); slot 1 is fp - 1 (storage[0]).
            clean_refs(fp.as_ptr(), outline.as_ptr());
            assert_eq!(storage[0], 0, "flagged slot 1 must be zeroed");
            assert_eq!(storage[1], 0xBBBB, "unflagged slot 0 must be untouched");
        }
    }
}

//! Collection-cycle tracing spans and events, gated behind the `tracing`
//! feature exactly as the donor gates its own `gc/tracing.rs` logging.

#[cfg(feature = "tracing")]
use tracing::span;

/// Create a span covering one `run_gc` cycle.
#[cfg(feature = "tracing")]
pub fn span_collection() -> span::EnteredSpan {
    tracing::debug_span!("run_gc").entered()
}

/// Log the outcome of a collection cycle.
#[cfg(feature = "tracing")]
pub fn log_collection_end(objects_reclaimed: usize, objects_surviving: usize, bytes_reclaimed: usize) {
    tracing::debug!(objects_reclaimed, objects_surviving, bytes_reclaimed, "collection_end");
}

/// Log a fatal `check_rsp` misalignment before the process exits.
#[cfg(feature = "tracing")]
pub fn log_check_rsp_violation(rsp: u64) {
    tracing::error!(rsp, "check_rsp violation, exiting with status 50");
}

/// Log the value read by `read_int`, mirroring the donor C runtime's debug
/// echo (`original_source/libcacophony.c`'s `fprintf(stderr, ...)`).
#[cfg(feature = "tracing")]
pub fn log_read_int(value: i64) {
    tracing::debug!(value, "read_int");
}

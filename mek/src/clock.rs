//! Kernel time sources.
//!
//! All TTL, friction and snapshot computations use monotonic nanoseconds
//! since process start. Wall-clock time appears only in persisted rows, as
//! ISO-8601 UTC. Monotonic readings are never compared across restarts.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since process start.
pub fn now_monotonic_ns() -> u64 {
    PROCESS_START.elapsed().as_nanos() as u64
}

/// ISO-8601 UTC timestamp for persisted rows.
pub fn now_utc_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a TTL in seconds to nanoseconds, clamping negatives to zero.
///
/// A zero (or negative) TTL yields a grant that is born already expired.
pub fn ttl_to_ns(ttl_seconds: f64) -> u64 {
    if ttl_seconds <= 0.0 {
        return 0;
    }
    (ttl_seconds * 1_000_000_000.0) as u64
}

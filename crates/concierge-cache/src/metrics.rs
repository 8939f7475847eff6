//! Cache metrics recorded through the `metrics` facade.
//!
//! The binary installs the Prometheus recorder; without one these calls are
//! no-ops.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_FALLBACKS_TOTAL: &str = "cache_fallbacks_total";
    pub const CACHE_REMOTE_CONNECTED: &str = "cache_remote_connected";
}

/// Record a cache hit on the given tier (`remote` or `local`).
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record an operation that fell back from the remote tier.
pub fn record_fallback(op: &'static str) {
    counter!(names::CACHE_FALLBACKS_TOTAL, "op" => op).increment(1);
}

/// Publish the remote readiness flag (1 = connected).
pub fn set_remote_connected(connected: bool) {
    gauge!(names::CACHE_REMOTE_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

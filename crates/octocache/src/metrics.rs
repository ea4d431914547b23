//! Cache metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the application.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "octocache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "octocache_misses_total";
    pub const CACHE_POPULATIONS_TOTAL: &str = "octocache_populations_total";
    pub const CACHE_FAIL_SAFE_TOTAL: &str = "octocache_fail_safe_total";
    pub const CACHE_EAGER_REFRESHES_TOTAL: &str = "octocache_eager_refreshes_total";
}

/// Record a cache hit on `tier` ("L1" or "L2").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a finished population ("success" or "failure").
pub fn record_population(outcome: &'static str) {
    counter!(names::CACHE_POPULATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a stale value served in place of a failed population.
pub fn record_fail_safe() {
    counter!(names::CACHE_FAIL_SAFE_TOTAL).increment(1);
}

/// Record a background refresh started before expiration.
pub fn record_eager_refresh() {
    counter!(names::CACHE_EAGER_REFRESHES_TOTAL).increment(1);
}

//! Cache metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the host
//! application installs a recorder.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "layercache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "layercache_misses_total";
    pub const ORIGIN_LOADS_TOTAL: &str = "layercache_origin_loads_total";
    pub const LOAD_ERRORS_TOTAL: &str = "layercache_load_errors_total";
    pub const COALESCED_LOADS_TOTAL: &str = "layercache_coalesced_loads_total";
    pub const REFRESHES_TOTAL: &str = "layercache_refreshes_total";
    pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "layercache_notifications_published_total";
    pub const NOTIFICATIONS_APPLIED_TOTAL: &str = "layercache_notifications_applied_total";
}

/// Record a hit on a cache tier.
pub fn record_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a lookup that no cache tier could answer.
pub fn record_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a value resolved by a data source.
pub fn record_origin_load(source: &str) {
    counter!(names::ORIGIN_LOADS_TOTAL, "source" => source.to_string()).increment(1);
}

pub fn record_load_error(source: &str) {
    counter!(names::LOAD_ERRORS_TOTAL, "source" => source.to_string()).increment(1);
}

/// Record a caller attached to an already running load.
pub fn record_coalesced() {
    counter!(names::COALESCED_LOADS_TOTAL).increment(1);
}

pub fn record_refresh(tier: &'static str) {
    counter!(names::REFRESHES_TOTAL, "tier" => tier).increment(1);
}

pub fn record_notification_published(action: &'static str) {
    counter!(names::NOTIFICATIONS_PUBLISHED_TOTAL, "action" => action).increment(1);
}

pub fn record_notification_applied(action: &'static str) {
    counter!(names::NOTIFICATIONS_APPLIED_TOTAL, "action" => action).increment(1);
}

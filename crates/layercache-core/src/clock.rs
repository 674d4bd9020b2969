//! Wall-clock helpers. All expiration times are Unix epoch milliseconds so
//! that local and remote tiers can be compared directly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Expiration timestamp for an entry written now with `ttl`.
pub fn expires_after(ttl: Duration) -> u64 {
    now_millis().saturating_add(ttl.as_millis() as u64)
}

/// Milliseconds left before `expires_at`, zero when already past.
pub fn millis_left(expires_at: u64) -> u64 {
    expires_at.saturating_sub(now_millis())
}

//! Experiment lifetime
//!
//! Every experiment expires `ttl_days` after creation. A non-positive TTL
//! falls back to one day so a typo never produces an immortal experiment.
//! TTLs past the end of the representable calendar expire at its last instant.

use chrono::{DateTime, Duration, Utc};

/// TTL applied when the requested value is zero or negative
pub const DEFAULT_TTL_DAYS: i64 = 1;

/// Instant at which an experiment created at `created_at` expires
pub fn calculate_ttl(created_at: DateTime<Utc>, ttl_days: i64) -> DateTime<Utc> {
    let days = if ttl_days <= 0 {
        DEFAULT_TTL_DAYS
    } else {
        ttl_days
    };
    Duration::try_days(days)
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// True once `now` has reached the expiry instant
pub fn should_delete(created_at: DateTime<Utc>, ttl_days: i64, now: DateTime<Utc>) -> bool {
    now >= calculate_ttl(created_at, ttl_days)
}

/// Time left until expiry, zero when already expired
pub fn time_remaining(
    created_at: DateTime<Utc>,
    ttl_days: i64,
    now: DateTime<Utc>,
) -> std::time::Duration {
    (calculate_ttl(created_at, ttl_days) - now)
        .to_std()
        .unwrap_or_default()
}

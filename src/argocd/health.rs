//! Application health acceptance policy
//!
//! Argo CD status is noisy for multi-source applications: sync is commonly
//! reported as `Unknown`, and large stacks can sit in `Degraded` while still
//! serving. The policy below accepts those states and rejects only
//! applications that deployed nothing or failed to render.

use super::types::ApplicationStatus;

pub const HEALTH_HEALTHY: &str = "Healthy";
pub const HEALTH_DEGRADED: &str = "Degraded";
pub const HEALTH_PROGRESSING: &str = "Progressing";
pub const HEALTH_MISSING: &str = "Missing";
pub const HEALTH_SUSPENDED: &str = "Suspended";

pub const SYNC_SYNCED: &str = "Synced";
pub const SYNC_UNKNOWN: &str = "Unknown";
pub const SYNC_OUT_OF_SYNC: &str = "OutOfSync";

/// Condition reported when manifest generation fails for a source
pub const CONDITION_COMPARISON_ERROR: &str = "ComparisonError";

/// Whether a health status allows promotion to the next layer
pub fn health_accepted(health: &str) -> bool {
    matches!(health, HEALTH_HEALTHY | HEALTH_DEGRADED | HEALTH_PROGRESSING)
}

/// Whether a sync status allows promotion to the next layer
pub fn sync_accepted(sync: &str) -> bool {
    matches!(sync, SYNC_SYNCED | SYNC_UNKNOWN | SYNC_OUT_OF_SYNC)
}

/// Apply the acceptance policy to a status projection
///
/// Missing health or sync status means still converging. A
/// `ComparisonError` condition rejects the application even when Argo CD
/// reports it healthy, since no resources were produced.
pub fn evaluate(status: &ApplicationStatus) -> bool {
    let (Some(health), Some(sync)) = (status.health_status(), status.sync_status()) else {
        return false;
    };

    if status
        .conditions
        .iter()
        .any(|c| c.type_ == CONDITION_COMPARISON_ERROR)
    {
        return false;
    }

    health_accepted(health) && sync_accepted(sync)
}

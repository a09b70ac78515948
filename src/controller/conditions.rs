//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

/// Every target's workload application is healthy
pub const CONDITION_TYPE_READY: &str = "Ready";
/// Infra and obs layers of every layered target are healthy
pub const CONDITION_TYPE_LAYERS_HEALTHY: &str = "LayersHealthy";
/// The referenced workflow reached a terminal phase
pub const CONDITION_TYPE_WORKFLOW_COMPLETE: &str = "WorkflowComplete";
pub const CONDITION_TYPE_EXPIRED: &str = "Expired";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Update or add a condition to the conditions list
///
/// The transition time only moves when the status changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        });
    }
}

/// Set a condition from a boolean
pub fn set_bool_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    value: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let status = if value {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    };
    set_condition(conditions, type_, status, reason, message, observed_generation);
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "WorkloadsHealthy",
            "All targets healthy",
            Some(2),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_TYPE_READY);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn test_set_condition_keeps_time_when_status_unchanged() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_READY.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: "Deploying".to_string(),
            message: "0/2 targets ready".to_string(),
            observed_generation: None,
        }];

        set_bool_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            false,
            "Deploying",
            "1/2 targets ready",
            None,
        );
        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
        assert_eq!(conditions[0].message, "1/2 targets ready");

        set_bool_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            true,
            "WorkloadsHealthy",
            "2/2 targets ready",
            None,
        );
        assert_eq!(conditions.len(), 1);
        assert_ne!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_find_condition() {
        let mut conditions = Vec::new();
        set_bool_condition(&mut conditions, CONDITION_TYPE_READY, true, "Ok", "", None);
        set_bool_condition(
            &mut conditions,
            CONDITION_TYPE_LAYERS_HEALTHY,
            false,
            "Converging",
            "",
            None,
        );

        assert!(is_condition_true(&conditions, CONDITION_TYPE_READY));
        assert!(!is_condition_true(&conditions, CONDITION_TYPE_LAYERS_HEALTHY));
        assert!(find_condition(&conditions, CONDITION_TYPE_EXPIRED).is_none());
        assert_eq!(conditions.len(), 2);
    }
}

//! Experiment Custom Resource Definition
//!
//! An Experiment describes a set of target clusters, the components to deploy
//! on each, optional observability, a time-to-live, and an optional workflow
//! whose completion marks the end of the run.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ExperimentPhase, Target, TargetStatus, WorkflowRef};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "experiments.illm.io",
    version = "v1alpha1",
    kind = "Experiment",
    namespaced,
    status = "ExperimentStatus",
    shortname = "exp",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"TTL","type":"integer","jsonPath":".spec.ttlDays"}"#,
    printcolumn = r#"{"name":"Expires","type":"string","jsonPath":".status.expiresAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    pub targets: Vec<Target>,

    /// Days until the experiment and its clusters are torn down.
    /// Values <= 0 are treated as 1.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,

    /// Workflow that marks completion of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowRef>,

    /// Commit a result summary once the workflow succeeds
    #[serde(default)]
    pub publish_results: bool,
}

fn default_ttl_days() -> i64 {
    1
}

impl ExperimentSpec {
    /// Validate the spec
    ///
    /// Rejects experiments without targets, duplicate target names, and
    /// component refs that do not name exactly one of `app` or `config`.
    pub fn validate(&self) -> Result<(), String> {
        if self.targets.is_empty() {
            return Err("spec.targets must contain at least one target".to_string());
        }

        let mut seen = BTreeSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err("spec.targets[].name must not be empty".to_string());
            }
            if !seen.insert(target.name.as_str()) {
                return Err(format!("duplicate target name {:?}", target.name));
            }
            if target.cluster.secret_ref.is_empty() {
                return Err(format!(
                    "target {:?}: cluster.secretRef must not be empty",
                    target.name
                ));
            }
            for (i, component) in target.components.iter().enumerate() {
                match (&component.app, &component.config) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => {
                        return Err(format!(
                            "target {:?}: components[{}] must set exactly one of app or config",
                            target.name, i
                        ))
                    }
                }
            }
        }

        Ok(())
    }
}

/// Status subresource of an Experiment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatus {
    #[serde(default)]
    pub phase: ExperimentPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetStatus>,

    /// Last observed phase of the referenced workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_phase: Option<String>,

    /// RFC 3339 instant at which the experiment is torn down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    /// Results have been committed for this run
    #[serde(default)]
    pub results_published: bool,
}

impl Experiment {
    /// Creation time as recorded by the API server
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }
}

//! Shared types for the Experiment CRD

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Abstract pointer to a deployable unit in the component catalog
///
/// Exactly one of `app` or `config` names the unit; `params` are passed
/// through to the resolved sources as Helm parameters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRef {
    /// Catalog application name (e.g. "metrics-agent")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// Catalog configuration name (e.g. "metrics-egress")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Parameter overrides keyed by Helm value path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ComponentRef {
    pub fn app(name: impl Into<String>) -> Self {
        Self {
            app: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn config(name: impl Into<String>) -> Self {
        Self {
            config: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// True when this ref names the given catalog app
    pub fn is_app(&self, name: &str) -> bool {
        self.app.as_deref() == Some(name)
    }

    /// True when this ref names the given catalog config
    pub fn is_config(&self, name: &str) -> bool {
        self.config.as_deref() == Some(name)
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.app, &self.config) {
            (Some(app), _) => write!(f, "app/{}", app),
            (None, Some(config)) => write!(f, "config/{}", config),
            (None, None) => write!(f, "<unnamed>"),
        }
    }
}

/// Observability settings for a target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySpec {
    /// Deploy the metrics agent and egress alongside the workload
    #[serde(default)]
    pub enabled: bool,

    /// How metrics leave the target cluster (e.g. "tailscale")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

/// Reference to the credentials of a provisioned target cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    /// Secret in the experiment's namespace holding the kubeconfig
    pub secret_ref: String,

    /// Key within the secret (default: "kubeconfig")
    #[serde(default = "default_kubeconfig_key")]
    pub key: String,

    /// API server URL; taken from the kubeconfig when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

fn default_kubeconfig_key() -> String {
    "kubeconfig".to_string()
}

/// One deployment destination within an experiment
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub name: String,

    pub cluster: ClusterRef,

    #[serde(default)]
    pub components: Vec<ComponentRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilitySpec>,
}

impl Target {
    pub fn observability_enabled(&self) -> bool {
        self.observability.as_ref().is_some_and(|o| o.enabled)
    }
}

/// Argo Workflow whose completion ends the experiment run
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef {
    pub name: String,

    /// Namespace of the workflow (default: "argo")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Lifecycle phase of an experiment
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExperimentPhase {
    #[default]
    Pending,
    /// Applications are being created or are still converging
    Deploying,
    /// Every target's workload is healthy
    Ready,
    /// The referenced workflow is executing
    Running,
    Succeeded,
    Failed,
    /// TTL elapsed; teardown in progress
    Expired,
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExperimentPhase::Pending => "Pending",
            ExperimentPhase::Deploying => "Deploying",
            ExperimentPhase::Ready => "Ready",
            ExperimentPhase::Running => "Running",
            ExperimentPhase::Succeeded => "Succeeded",
            ExperimentPhase::Failed => "Failed",
            ExperimentPhase::Expired => "Expired",
        };
        write!(f, "{}", s)
    }
}

/// Per-target deployment progress
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Layers that have an Argo CD application
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<String>,

    /// Workload application is healthy
    #[serde(default)]
    pub ready: bool,

    /// Deployed resources as `Kind/name`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// Condition for the Experiment status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "LayersHealthy", "Expired")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

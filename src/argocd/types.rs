//! Typed model of the Argo CD `Application` resource
//!
//! Only the fields this operator writes (spec) or reads (status) are modeled.
//! Applications are stored as `DynamicObject`s so fields owned by Argo CD are
//! preserved across read-modify-write cycles.

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const APPLICATION_GROUP: &str = "argoproj.io";
pub const APPLICATION_VERSION: &str = "v1alpha1";
pub const APPLICATION_KIND: &str = "Application";
pub const APPLICATION_PLURAL: &str = "applications";

/// Namespace Argo CD watches for Application objects
pub const DEFAULT_ARGOCD_NAMESPACE: &str = "argocd";

/// Argo CD project every experiment application belongs to
pub const DEFAULT_PROJECT: &str = "default";

pub const SYNC_OPTION_CREATE_NAMESPACE: &str = "CreateNamespace=true";
pub const SYNC_OPTION_SERVER_SIDE_APPLY: &str = "ServerSideApply=true";

/// Source name used for values-only git sources
pub const VALUES_REF: &str = "values";

/// ApiResource for `argoproj.io/v1alpha1` Application
pub fn application_resource() -> ApiResource {
    ApiResource {
        group: APPLICATION_GROUP.to_string(),
        version: APPLICATION_VERSION.to_string(),
        api_version: format!("{}/{}", APPLICATION_GROUP, APPLICATION_VERSION),
        kind: APPLICATION_KIND.to_string(),
        plural: APPLICATION_PLURAL.to_string(),
    }
}

/// `spec` of an Argo CD Application
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub project: String,
    pub sources: Vec<ApplicationSource>,
    pub destination: ApplicationDestination,
    pub sync_policy: SyncPolicy,
}

/// How a source is rendered by Argo CD
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Helm repository chart name
    Chart(String),
    /// Directory within a git repository
    Path(String),
    /// Values-only git source referenced as `$<ref>/...`
    Ref(String),
}

/// One entry of `spec.sources`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    #[serde(rename = "targetRevision")]
    pub target_revision: String,

    #[serde(flatten)]
    pub kind: SourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<HelmParameter>,
}

impl HelmSource {
    pub fn is_empty(&self) -> bool {
        self.release_name.is_none() && self.value_files.is_empty() && self.parameters.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HelmParameter {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApplicationDestination {
    pub server: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    pub automated: AutomatedSync,
    pub sync_options: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSync {
    pub prune: bool,
    pub self_heal: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            automated: AutomatedSync {
                prune: true,
                self_heal: true,
            },
            sync_options: vec![
                SYNC_OPTION_CREATE_NAMESPACE.to_string(),
                SYNC_OPTION_SERVER_SIDE_APPLY.to_string(),
            ],
        }
    }
}

// ============================================================================
// Status projection
// ============================================================================

/// Read-only view of `status`, populated by Argo CD
///
/// Every field is optional: a missing field means the application is still
/// converging, never that it failed.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub health: Option<StatusCode>,

    #[serde(default)]
    pub sync: Option<StatusCode>,

    #[serde(default)]
    pub conditions: Vec<ApplicationCondition>,

    #[serde(default)]
    pub resources: Vec<ResourceStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct StatusCode {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ApplicationCondition {
    #[serde(rename = "type", default)]
    pub type_: String,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ResourceStatus {
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

impl ApplicationStatus {
    /// Project the status of a stored Application
    ///
    /// Returns `None` when the object carries no status yet, or when the
    /// status does not match the expected shape.
    pub fn from_object(app: &DynamicObject) -> Option<Self> {
        let raw = app.data.get("status")?;
        match serde_json::from_value(raw.clone()) {
            Ok(status) => Some(status),
            Err(e) => {
                debug!("Ignoring unparseable status on {:?}: {}", app.metadata.name, e);
                None
            }
        }
    }

    pub fn health_status(&self) -> Option<&str> {
        self.health.as_ref()?.status.as_deref()
    }

    pub fn sync_status(&self) -> Option<&str> {
        self.sync.as_ref()?.status.as_deref()
    }

    /// Deployed resources rendered as `Kind/name`
    pub fn resource_names(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter_map(|r| match (r.kind.as_deref(), r.name.as_deref()) {
                (Some(kind), Some(name)) if !kind.is_empty() && !name.is_empty() => {
                    Some(format!("{}/{}", kind, name))
                }
                _ => None,
            })
            .collect()
    }
}

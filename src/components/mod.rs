//! Component resolution
//!
//! Maps abstract [`ComponentRef`]s to concrete deployable sources. The
//! reconciler only depends on the [`ComponentResolver`] trait; the file-backed
//! [`CatalogResolver`] is the implementation used by the operator binary.

mod catalog;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crd::ComponentRef;
use crate::error::Result;

pub use catalog::{Catalog, CatalogEntry, CatalogResolver};

/// A concrete deployable unit produced by resolution
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    #[serde(default = "default_revision")]
    pub target_revision: String,

    /// Helm repository chart name; empty for git sources
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,

    /// Directory within a git repository
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmConfig>,
}

fn default_revision() -> String {
    "HEAD".to_string()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelmConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,

    /// Ordered values files; `$values/...` entries point into a sibling git source
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl Source {
    pub fn is_chart(&self) -> bool {
        !self.chart.is_empty()
    }

    /// True when any Helm values file is served from a `$values` ref source
    pub fn uses_values_ref(&self) -> bool {
        self.helm
            .as_ref()
            .is_some_and(|h| h.values_files.iter().any(|f| f.starts_with("$values")))
    }
}

/// Output of resolving one [`ComponentRef`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedComponent {
    pub name: String,
    pub sources: Vec<Source>,
}

/// Resolves component references to deployable sources
///
/// Resolution is all-or-nothing per call: an error means none of the refs
/// should be deployed from this call.
#[async_trait]
pub trait ComponentResolver: Send + Sync {
    async fn resolve(&self, refs: &[ComponentRef]) -> Result<Vec<ResolvedComponent>>;
}

//! File-backed component catalog

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ComponentResolver, ResolvedComponent, Source};
use crate::crd::ComponentRef;
use crate::error::{Error, Result};

/// Catalog of deployable components keyed by app and config name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub apps: BTreeMap<String, CatalogEntry>,

    #[serde(default)]
    pub configs: BTreeMap<String, CatalogEntry>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub sources: Vec<Source>,
}

impl Catalog {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn lookup(&self, component: &ComponentRef) -> Option<(&str, &CatalogEntry)> {
        match (&component.app, &component.config) {
            (Some(app), _) => self.apps.get_key_value(app).map(|(k, e)| (k.as_str(), e)),
            (None, Some(config)) => self.configs.get_key_value(config).map(|(k, e)| (k.as_str(), e)),
            (None, None) => None,
        }
    }
}

/// Resolves refs against a catalog loaded once at startup
#[derive(Clone, Debug, Default)]
pub struct CatalogResolver {
    catalog: Catalog,
}

impl CatalogResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Load the catalog from a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::ConfigError(format!("failed to read catalog {}: {}", path.display(), e))
        })?;
        let catalog = Catalog::from_yaml(&raw)?;
        info!(
            "Loaded component catalog from {} ({} apps, {} configs)",
            path.display(),
            catalog.apps.len(),
            catalog.configs.len()
        );
        Ok(Self::new(catalog))
    }

    fn resolve_one(&self, component: &ComponentRef) -> Result<ResolvedComponent> {
        let (name, entry) = self
            .catalog
            .lookup(component)
            .ok_or_else(|| Error::ResolveError(format!("{} not found in catalog", component)))?;

        let sources = entry
            .sources
            .iter()
            .map(|source| with_params(source, &component.params))
            .collect();

        debug!("Resolved {} to {} source(s)", component, entry.sources.len());
        Ok(ResolvedComponent {
            name: name.to_string(),
            sources,
        })
    }
}

/// Merge ref params into the Helm parameters of Helm-capable sources
fn with_params(source: &Source, params: &BTreeMap<String, String>) -> Source {
    let mut source = source.clone();
    if params.is_empty() || !(source.is_chart() || source.helm.is_some()) {
        return source;
    }
    source
        .helm
        .get_or_insert_with(Default::default)
        .parameters
        .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
    source
}

#[async_trait]
impl ComponentResolver for CatalogResolver {
    async fn resolve(&self, refs: &[ComponentRef]) -> Result<Vec<ResolvedComponent>> {
        refs.iter().map(|r| self.resolve_one(r)).collect()
    }
}

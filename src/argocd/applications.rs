//! Argo CD Application management
//!
//! Creates, updates, deletes and health-checks the Applications backing each
//! experiment target. Every write is a read-modify-write of the whole `spec`;
//! metadata and status owned by Argo CD are left untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DynamicObject, ObjectMeta};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::cluster::{MANAGED_BY, MANAGED_BY_LABEL};
use super::control_plane::ControlPlane;
use super::health;
use super::layers::{legacy_application_name, Layer};
use super::manifest::build_spec;
use super::types::{application_resource, ApplicationSpec, ApplicationStatus};
use crate::components::ComponentResolver;
use crate::crd::{ComponentRef, Target};
use crate::error::{Error, Result};

pub const EXPERIMENT_LABEL: &str = "experiments.illm.io/experiment";
pub const TARGET_LABEL: &str = "experiments.illm.io/target";
pub const LAYER_LABEL: &str = "experiments.illm.io/layer";

pub const POD_SECURITY_ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";
pub const POD_SECURITY_ENFORCE_VERSION_LABEL: &str = "pod-security.kubernetes.io/enforce-version";

/// Result of synchronizing one Application
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    /// No sources resolved; nothing was written
    Skipped,
}

impl SyncOutcome {
    /// True when an Application now exists for the synchronized components
    pub fn is_deployed(&self) -> bool {
        !matches!(self, SyncOutcome::Skipped)
    }
}

/// Standard labels for an experiment Application
pub fn application_labels(
    experiment: &str,
    target: &str,
    layer: Option<Layer>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(EXPERIMENT_LABEL.to_string(), experiment.to_string());
    labels.insert(TARGET_LABEL.to_string(), target.to_string());
    if let Some(layer) = layer {
        labels.insert(LAYER_LABEL.to_string(), layer.to_string());
    }
    labels
}

/// Destination namespace with permissive pod security
pub fn build_namespace(name: &str) -> Namespace {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(
        POD_SECURITY_ENFORCE_LABEL.to_string(),
        "privileged".to_string(),
    );
    labels.insert(
        POD_SECURITY_ENFORCE_VERSION_LABEL.to_string(),
        "latest".to_string(),
    );

    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Manages Argo CD Applications for experiment targets
#[derive(Clone)]
pub struct ApplicationManager {
    control_plane: Arc<dyn ControlPlane>,
    resolver: Arc<dyn ComponentResolver>,
}

impl ApplicationManager {
    pub fn new(control_plane: Arc<dyn ControlPlane>, resolver: Arc<dyn ComponentResolver>) -> Self {
        Self {
            control_plane,
            resolver,
        }
    }

    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    /// Create or update an Application with the given spec
    ///
    /// The destination namespace is provisioned first; failure to do so is
    /// logged and tolerated since Argo CD's `CreateNamespace=true` creates it
    /// (without the pod security labels).
    #[instrument(skip(self, labels, spec))]
    pub async fn sync_application(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        spec: &ApplicationSpec,
    ) -> Result<SyncOutcome> {
        let destination_namespace = &spec.destination.namespace;
        if let Err(e) = self.ensure_namespace(destination_namespace).await {
            error!(
                "Failed to ensure namespace {}: {:?}",
                destination_namespace, e
            );
        }

        let spec_value = serde_json::to_value(spec)?;

        match self.control_plane.get_application(name).await? {
            Some(mut existing) => {
                existing.data["spec"] = spec_value;
                self.control_plane.replace_application(&existing).await?;
                info!("Updated Argo CD Application {}", name);
                Ok(SyncOutcome::Updated)
            }
            None => {
                let mut app = DynamicObject::new(name, &application_resource())
                    .within(self.control_plane.namespace())
                    .data(json!({ "spec": spec_value }));
                app.metadata.labels = Some(labels);
                self.control_plane.create_application(&app).await?;
                info!("Created Argo CD Application {}", name);
                Ok(SyncOutcome::Created)
            }
        }
    }

    /// Resolve components and synchronize them into one Application
    async fn sync_components(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        experiment: &str,
        server: &str,
        components: &[ComponentRef],
    ) -> Result<SyncOutcome> {
        let resolved = self.resolver.resolve(components).await?;

        let Some(spec) = build_spec(&resolved, server, experiment) else {
            info!("No components resolved for {}, skipping", name);
            return Ok(SyncOutcome::Skipped);
        };

        self.sync_application(name, labels, &spec).await
    }

    /// Create or update the single unlayered Application for a target
    #[instrument(skip(self, target), fields(target = %target.name))]
    pub async fn create_application(
        &self,
        experiment: &str,
        target: &Target,
        server: &str,
    ) -> Result<SyncOutcome> {
        let name = legacy_application_name(experiment, &target.name);
        let labels = application_labels(experiment, &target.name, None);
        self.sync_components(&name, labels, experiment, server, &target.components)
            .await
    }

    /// Create or update the Application for one deployment layer
    #[instrument(skip(self, components), fields(layer = %layer))]
    pub async fn create_layered_application(
        &self,
        experiment: &str,
        target: &str,
        server: &str,
        layer: Layer,
        components: &[ComponentRef],
    ) -> Result<SyncOutcome> {
        let name = layer.application_name(experiment, target);
        let labels = application_labels(experiment, target, Some(layer));
        self.sync_components(&name, labels, experiment, server, components)
            .await
            .map_err(|e| match e {
                Error::ResolveError(msg) => Error::ResolveError(format!("{} layer: {}", layer, msg)),
                other => other,
            })
    }

    /// Delete an Application by name; an absent Application is not an error
    pub async fn delete_named(&self, name: &str) -> Result<()> {
        if self.control_plane.delete_application(name).await? {
            info!("Deleted Argo CD Application {}", name);
        } else {
            debug!("Argo CD Application {} already deleted", name);
        }
        Ok(())
    }

    /// Delete the unlayered Application of a target
    pub async fn delete_application(&self, experiment: &str, target: &str) -> Result<()> {
        self.delete_named(&legacy_application_name(experiment, target))
            .await
    }

    /// Delete every layer Application of a target
    ///
    /// The workload layer shares the unlayered name, so this also removes a
    /// legacy single Application. All deletions are attempted; the first
    /// failure other than "not found" is returned afterwards.
    #[instrument(skip(self))]
    pub async fn delete_layered_applications(&self, experiment: &str, target: &str) -> Result<()> {
        let names: Vec<String> = Layer::ALL
            .iter()
            .map(|layer| layer.application_name(experiment, target))
            .collect();

        let results = join_all(names.iter().map(|name| self.delete_named(name))).await;

        let mut first_error = None;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to delete Application {}: {:?}", name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply the health acceptance policy to an Application
    ///
    /// A missing Application or missing status is "not yet healthy".
    #[instrument(skip(self))]
    pub async fn is_healthy(&self, name: &str) -> Result<bool> {
        let Some(app) = self.control_plane.get_application(name).await? else {
            debug!("Application {} not created yet", name);
            return Ok(false);
        };

        let healthy = ApplicationStatus::from_object(&app)
            .map(|status| health::evaluate(&status))
            .unwrap_or(false);
        debug!("Application {} healthy={}", name, healthy);
        Ok(healthy)
    }

    /// Health of the unlayered Application of a target
    pub async fn is_application_healthy(&self, experiment: &str, target: &str) -> Result<bool> {
        self.is_healthy(&legacy_application_name(experiment, target))
            .await
    }

    /// Health of one layer Application of a target
    pub async fn is_layer_healthy(&self, experiment: &str, target: &str, layer: Layer) -> Result<bool> {
        self.is_healthy(&layer.application_name(experiment, target))
            .await
    }

    /// Resources deployed by an Application, as `Kind/name`
    pub async fn application_components(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .control_plane
            .get_application(name)
            .await?
            .and_then(|app| ApplicationStatus::from_object(&app))
            .map(|status| status.resource_names())
            .unwrap_or_default())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        self.control_plane
            .apply_namespace(&build_namespace(name))
            .await
    }
}

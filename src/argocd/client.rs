//! High-level Argo CD operations used by the experiment reconciler

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::applications::{ApplicationManager, SyncOutcome};
use super::cluster::{register_cluster, unregister_cluster};
use super::control_plane::ControlPlane;
use super::layers::{classify, observability_component_refs, ClassifiedComponents, Layer, TailscaleOAuth};
use crate::components::ComponentResolver;
use crate::crd::Target;
use crate::error::{Error, Result};

/// What one pass did for a target
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetDeployment {
    /// Observability is enabled and the target is deployed in layers
    pub layered: bool,
    /// Layers that have an Application, in layer order
    pub layers: Vec<Layer>,
    pub layers_healthy: bool,
    /// The workload layer was created during this pass
    pub promoted: bool,
}

/// Cluster registration plus Application lifecycle for experiment targets
#[derive(Clone)]
pub struct ArgoClient {
    apps: ApplicationManager,
}

impl ArgoClient {
    pub fn new(control_plane: Arc<dyn ControlPlane>, resolver: Arc<dyn ComponentResolver>) -> Self {
        Self {
            apps: ApplicationManager::new(control_plane, resolver),
        }
    }

    pub fn applications(&self) -> &ApplicationManager {
        &self.apps
    }

    /// Register a cluster and deploy a target as one unlayered Application
    #[instrument(skip(self, target, kubeconfig), fields(target = %target.name))]
    pub async fn register_cluster_and_create_apps(
        &self,
        experiment: &str,
        target: &Target,
        cluster: &str,
        kubeconfig: &[u8],
        server: &str,
    ) -> Result<SyncOutcome> {
        register_cluster(self.apps.control_plane(), cluster, kubeconfig, server).await?;
        self.apps.create_application(experiment, target, server).await
    }

    /// Register a target's cluster and drive its Applications one step forward
    ///
    /// Targets without observability get a single Application. Otherwise the
    /// infra and obs layers are synchronized first and the workload layer is
    /// only deployed once both report healthy. Observability components the
    /// resolver does not know are skipped and the workload deploys ungated.
    #[instrument(skip(self, target, kubeconfig, oauth), fields(target = %target.name))]
    pub async fn deploy_target(
        &self,
        experiment: &str,
        target: &Target,
        cluster: &str,
        kubeconfig: &[u8],
        server: &str,
        oauth: &TailscaleOAuth,
    ) -> Result<TargetDeployment> {
        if !target.observability_enabled() {
            self.register_cluster_and_create_apps(experiment, target, cluster, kubeconfig, server)
                .await?;
            return Ok(TargetDeployment::default());
        }

        let refs = target
            .observability
            .as_ref()
            .map(|obs| observability_component_refs(obs, experiment, oauth))
            .unwrap_or_default();
        let classified = classify(&target.components, &refs);

        let mut layers = match self
            .register_cluster_and_create_layered_apps(
                experiment,
                &target.name,
                cluster,
                kubeconfig,
                server,
                &classified,
            )
            .await
        {
            Ok(layers) => layers,
            Err(Error::ResolveError(msg)) => {
                warn!(
                    "Observability unavailable for {}/{}, deploying without it: {}",
                    experiment, target.name, msg
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let layers_healthy = self.layers_healthy(experiment, &target.name, &layers).await?;
        let mut promoted = false;
        if layers_healthy {
            let workload = self.deploy_workload_layer(experiment, target, server).await?;
            promoted = workload == SyncOutcome::Created;
            if workload.is_deployed() {
                layers.push(Layer::Workload);
            }
        }

        Ok(TargetDeployment {
            layered: true,
            layers,
            layers_healthy,
            promoted,
        })
    }

    /// Register a cluster and deploy the infra and obs layers of a target
    ///
    /// Both layers are synchronized concurrently: obs clients retry until the
    /// infra tunnel is up. The workload layer is not touched; it is promoted
    /// by [`ArgoClient::deploy_workload_layer`] once these layers are healthy.
    /// Returns the layers that now have an Application, in layer order.
    #[instrument(skip(self, kubeconfig, classified))]
    pub async fn register_cluster_and_create_layered_apps(
        &self,
        experiment: &str,
        target: &str,
        cluster: &str,
        kubeconfig: &[u8],
        server: &str,
        classified: &ClassifiedComponents,
    ) -> Result<Vec<Layer>> {
        register_cluster(self.apps.control_plane(), cluster, kubeconfig, server).await?;

        let (infra, obs) = futures::try_join!(
            self.sync_layer(experiment, target, server, Layer::Infra, classified),
            self.sync_layer(experiment, target, server, Layer::Obs, classified),
        )?;

        Ok([infra, obs].into_iter().flatten().collect())
    }

    async fn sync_layer(
        &self,
        experiment: &str,
        target: &str,
        server: &str,
        layer: Layer,
        classified: &ClassifiedComponents,
    ) -> Result<Option<Layer>> {
        let components = classified.layer(layer);
        if components.is_empty() {
            return Ok(None);
        }
        let outcome = self
            .apps
            .create_layered_application(experiment, target, server, layer, components)
            .await?;
        Ok(outcome.is_deployed().then_some(layer))
    }

    /// True when every given layer Application passes the health policy
    pub async fn layers_healthy(&self, experiment: &str, target: &str, layers: &[Layer]) -> Result<bool> {
        for layer in layers {
            if !self.apps.is_layer_healthy(experiment, target, *layer).await? {
                info!(
                    "Layer {} of {}/{} not healthy yet",
                    layer, experiment, target
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deploy the workload layer of a target
    pub async fn deploy_workload_layer(
        &self,
        experiment: &str,
        target: &Target,
        server: &str,
    ) -> Result<SyncOutcome> {
        self.apps
            .create_layered_application(
                experiment,
                &target.name,
                server,
                Layer::Workload,
                &target.components,
            )
            .await
    }

    /// Delete every Application of the given targets and unregister clusters
    ///
    /// Continues past individual failures so one stuck object does not leak
    /// the rest; the first failure is returned so the caller retries.
    #[instrument(skip(self, targets, clusters))]
    pub async fn delete_cluster_and_apps(
        &self,
        experiment: &str,
        targets: &[Target],
        clusters: &[String],
    ) -> Result<()> {
        let mut first_error = None;

        for target in targets {
            if let Err(e) = self
                .apps
                .delete_layered_applications(experiment, &target.name)
                .await
            {
                warn!(
                    "Failed to delete Applications for {}/{}: {:?}",
                    experiment, target.name, e
                );
                first_error.get_or_insert(e);
            }
        }

        for cluster in clusters {
            if let Err(e) = unregister_cluster(self.apps.control_plane(), cluster).await {
                warn!("Failed to unregister cluster {}: {:?}", cluster, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

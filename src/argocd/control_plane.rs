//! Access to the Argo CD control plane
//!
//! [`ControlPlane`] is the seam between the reconciliation logic and the
//! Kubernetes API. [`KubeControlPlane`] talks to the cluster hosting Argo CD;
//! tests substitute an in-memory implementation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, instrument};

use super::types::application_resource;
use crate::error::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "experiment-operator";

/// Operations the reconciler performs against Argo CD and its host cluster
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Namespace holding Application objects and cluster secrets
    fn namespace(&self) -> &str;

    /// Fetch an Application; `None` when it does not exist
    async fn get_application(&self, name: &str) -> Result<Option<DynamicObject>>;

    async fn create_application(&self, app: &DynamicObject) -> Result<()>;

    /// Replace a previously fetched Application in a single write
    async fn replace_application(&self, app: &DynamicObject) -> Result<()>;

    /// Delete an Application; `false` when it was already absent
    async fn delete_application(&self, name: &str) -> Result<bool>;

    /// Create or update a namespace on the Argo CD host cluster
    async fn apply_namespace(&self, namespace: &Namespace) -> Result<()>;

    /// Create or update an Argo CD cluster secret
    async fn apply_cluster_secret(&self, secret: &Secret) -> Result<()>;

    /// Delete a cluster secret; `false` when it was already absent
    async fn delete_cluster_secret(&self, name: &str) -> Result<bool>;
}

/// [`ControlPlane`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    namespace: String,
}

impl KubeControlPlane {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn applications(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &application_resource())
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn object_name(meta_name: &Option<String>) -> Result<&str> {
    meta_name
        .as_deref()
        .ok_or_else(|| Error::ConfigError("object has no metadata.name".to_string()))
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn get_application(&self, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.applications().get_opt(name).await?)
    }

    async fn create_application(&self, app: &DynamicObject) -> Result<()> {
        self.applications()
            .create(&PostParams::default(), app)
            .await?;
        Ok(())
    }

    async fn replace_application(&self, app: &DynamicObject) -> Result<()> {
        let name = object_name(&app.metadata.name)?;
        self.applications()
            .replace(name, &PostParams::default(), app)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn delete_application(&self, name: &str) -> Result<bool> {
        match self
            .applications()
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Application {} not found", name);
                Ok(false)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn apply_namespace(&self, namespace: &Namespace) -> Result<()> {
        let name = object_name(&namespace.metadata.name)?;
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(namespace),
        )
        .await?;
        Ok(())
    }

    async fn apply_cluster_secret(&self, secret: &Secret) -> Result<()> {
        let name = object_name(&secret.metadata.name)?;
        self.secrets()
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(secret),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn delete_cluster_secret(&self, name: &str) -> Result<bool> {
        match self.secrets().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Cluster secret {} not found", name);
                Ok(false)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

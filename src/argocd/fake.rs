//! In-memory control plane for tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::DynamicObject;
use kube::core::ErrorResponse;
use serde_json::Value;

use super::control_plane::ControlPlane;
use super::types::DEFAULT_ARGOCD_NAMESPACE;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct FakeState {
    pub applications: BTreeMap<String, DynamicObject>,
    pub namespaces: BTreeMap<String, Namespace>,
    pub secrets: BTreeMap<String, Secret>,
    pub creates: usize,
    pub replaces: usize,
    pub fail_namespaces: bool,
    pub fail_gets: bool,
    pub fail_deletes: BTreeSet<String>,
}

pub struct FakeControlPlane {
    namespace: String,
    state: Mutex<FakeState>,
}

fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            namespace: DEFAULT_ARGOCD_NAMESPACE.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn application(&self, name: &str) -> Option<DynamicObject> {
        self.state().applications.get(name).cloned()
    }

    pub fn spec(&self, name: &str) -> Option<Value> {
        self.application(name).map(|app| app.data["spec"].clone())
    }

    /// Simulate Argo CD writing status onto an Application
    pub fn set_status(&self, name: &str, status: Value) {
        if let Some(app) = self.state().applications.get_mut(name) {
            app.data["status"] = status;
        }
    }

    pub fn set_health(&self, name: &str, health: &str, sync: &str) {
        self.set_status(
            name,
            serde_json::json!({
                "health": {"status": health},
                "sync": {"status": sync}
            }),
        );
    }

    pub fn application_names(&self) -> Vec<String> {
        self.state().applications.keys().cloned().collect()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_application(&self, name: &str) -> Result<Option<DynamicObject>> {
        let state = self.state();
        if state.fail_gets {
            return Err(api_error(500, "InternalError"));
        }
        Ok(state.applications.get(name).cloned())
    }

    async fn create_application(&self, app: &DynamicObject) -> Result<()> {
        let name = app.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        if state.applications.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.creates += 1;
        state.applications.insert(name, app.clone());
        Ok(())
    }

    async fn replace_application(&self, app: &DynamicObject) -> Result<()> {
        let name = app.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        if !state.applications.contains_key(&name) {
            return Err(api_error(404, "NotFound"));
        }
        state.replaces += 1;
        state.applications.insert(name, app.clone());
        Ok(())
    }

    async fn delete_application(&self, name: &str) -> Result<bool> {
        let mut state = self.state();
        if state.fail_deletes.contains(name) {
            return Err(api_error(500, "InternalError"));
        }
        Ok(state.applications.remove(name).is_some())
    }

    async fn apply_namespace(&self, namespace: &Namespace) -> Result<()> {
        let mut state = self.state();
        if state.fail_namespaces {
            return Err(api_error(403, "Forbidden"));
        }
        let name = namespace.metadata.name.clone().unwrap_or_default();
        state.namespaces.insert(name, namespace.clone());
        Ok(())
    }

    async fn apply_cluster_secret(&self, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.state().secrets.insert(name, secret.clone());
        Ok(())
    }

    async fn delete_cluster_secret(&self, name: &str) -> Result<bool> {
        Ok(self.state().secrets.remove(name).is_some())
    }
}

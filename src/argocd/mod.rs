//! Argo CD integration
//!
//! Layered GitOps deployment of experiment targets: classification of
//! components into layers, Application manifest building and
//! synchronization, health evaluation, and cluster registration.

pub mod applications;
pub mod client;
pub mod cluster;
pub mod control_plane;
pub mod health;
pub mod layers;
pub mod manifest;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use applications::{ApplicationManager, SyncOutcome};
pub use client::{ArgoClient, TargetDeployment};
pub use cluster::{kubeconfig_server, register_cluster, unregister_cluster};
pub use control_plane::{ControlPlane, KubeControlPlane};
pub use layers::{
    classify, observability_component_refs, ClassifiedComponents, Layer, TailscaleOAuth,
};
pub use manifest::build_spec;
pub use types::{ApplicationSpec, ApplicationStatus, DEFAULT_ARGOCD_NAMESPACE};

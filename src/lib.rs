//! Experiment operator: layered GitOps delivery for ephemeral experiments
//!
//! This crate provides a Kubernetes operator that deploys the components of
//! an Experiment onto its target clusters through Argo CD, gating workloads
//! behind healthy infrastructure and observability layers, and tears
//! everything down when the experiment expires or is deleted.

pub mod argocd;
pub mod components;
pub mod controller;
pub mod crd;
pub mod error;
pub mod results;
pub mod telemetry;

pub use crate::error::{Error, Result};

//! Finalizer for Experiment teardown
//!
//! While the finalizer is present, deleting an Experiment first removes its
//! Argo CD Applications and cluster registrations. The kube-rs `finalizer`
//! helper adds and removes it.

/// Finalizer name used to protect Experiment resources
pub const EXPERIMENT_FINALIZER: &str = "experiments.illm.io/finalizer";

//! Controller module for Experiment reconciliation
//! This module contains the main controller loop, the experiment lifecycle
//! clock and workflow phase observation.

pub mod conditions;
mod finalizers;
pub mod lifecycle;
mod reconciler;
pub mod workflow;

pub use finalizers::EXPERIMENT_FINALIZER;
pub use lifecycle::{calculate_ttl, should_delete};
pub use reconciler::{cluster_name, run_controller, ControllerState};
pub use workflow::{is_succeeded, is_terminal, workflow_phase, DEFAULT_WORKFLOW_NAMESPACE};

//! Custom Resource Definitions for the experiment operator

mod experiment;
pub mod types;


pub use experiment::{Experiment, ExperimentSpec, ExperimentStatus};
pub use types::*;

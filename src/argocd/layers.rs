//! Deployment layers and component classification
//!
//! Observability components are split into an `infra` layer (the mesh tunnel
//! operator) and an `obs` layer (metrics agent and egress). User components
//! always form the `workload` layer, which is only deployed once the other
//! layers report healthy.

use std::fmt;

use tracing::warn;

use crate::crd::{ComponentRef, ObservabilitySpec};

pub const TAILSCALE_OPERATOR_APP: &str = "tailscale-operator";
pub const METRICS_AGENT_APP: &str = "metrics-agent";
pub const METRICS_EGRESS_CONFIG: &str = "metrics-egress";

/// Transport that requires the tunnel operator in the infra layer
pub const TRANSPORT_TAILSCALE: &str = "tailscale";

/// Helm parameter carrying the experiment name as an external metrics label
pub const METRICS_AGENT_EXPERIMENT_PARAM: &str = "alloy.extraEnv[0].value";

/// Ordered deployment phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Infra,
    Obs,
    Workload,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Infra, Layer::Obs, Layer::Workload];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Infra => "infra",
            Layer::Obs => "obs",
            Layer::Workload => "workload",
        }
    }

    /// Argo CD Application name for this layer
    ///
    /// The workload layer keeps the unlayered `{experiment}-{target}` name so
    /// experiments deployed without layering are still found.
    pub fn application_name(&self, experiment: &str, target: &str) -> String {
        match self {
            Layer::Workload => legacy_application_name(experiment, target),
            layer => format!("{}-{}-{}", experiment, target, layer.as_str()),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the single application used when a target has no layers
pub fn legacy_application_name(experiment: &str, target: &str) -> String {
    format!("{}-{}", experiment, target)
}

/// Component refs split into deployment layers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassifiedComponents {
    pub infra: Vec<ComponentRef>,
    pub obs: Vec<ComponentRef>,
    pub workload: Vec<ComponentRef>,
}

impl ClassifiedComponents {
    /// True when infra or obs components exist and layering is needed
    pub fn has_layers(&self) -> bool {
        !self.infra.is_empty() || !self.obs.is_empty()
    }

    pub fn layer(&self, layer: Layer) -> &[ComponentRef] {
        match layer {
            Layer::Infra => &self.infra,
            Layer::Obs => &self.obs,
            Layer::Workload => &self.workload,
        }
    }
}

/// Partition user and observability refs into layers
///
/// User refs always land in `workload`. Unrecognized observability refs
/// default to `obs` so they never block the workload layer.
pub fn classify(workload: &[ComponentRef], observability: &[ComponentRef]) -> ClassifiedComponents {
    let mut result = ClassifiedComponents {
        workload: workload.to_vec(),
        ..Default::default()
    };

    for component in observability {
        if component.is_app(TAILSCALE_OPERATOR_APP) {
            result.infra.push(component.clone());
        } else if component.is_app(METRICS_AGENT_APP) || component.is_config(METRICS_EGRESS_CONFIG)
        {
            result.obs.push(component.clone());
        } else {
            warn!(
                "Unrecognized observability component {}, deploying in obs layer",
                component
            );
            result.obs.push(component.clone());
        }
    }

    result
}

/// OAuth client credentials handed to the tunnel operator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailscaleOAuth {
    pub client_id: String,
    pub client_secret: String,
}

impl TailscaleOAuth {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Observability component refs for a target
///
/// Always includes the metrics egress and agent; adds the tunnel operator
/// when the transport is `tailscale`.
pub fn observability_component_refs(
    obs: &ObservabilitySpec,
    experiment: &str,
    oauth: &TailscaleOAuth,
) -> Vec<ComponentRef> {
    let mut refs = vec![
        ComponentRef::config(METRICS_EGRESS_CONFIG),
        ComponentRef::app(METRICS_AGENT_APP).with_param(METRICS_AGENT_EXPERIMENT_PARAM, experiment),
    ];

    if obs.transport.as_deref() == Some(TRANSPORT_TAILSCALE) {
        let mut operator = ComponentRef::app(TAILSCALE_OPERATOR_APP);
        if oauth.is_configured() {
            operator = operator
                .with_param("oauth.clientId", oauth.client_id.as_str())
                .with_param("oauth.clientSecret", oauth.client_secret.as_str());
        }
        refs.push(operator);
    }

    refs
}

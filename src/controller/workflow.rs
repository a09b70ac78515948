//! Argo Workflow phase observation
//!
//! An experiment with a `workflow` reference runs until that workflow reaches
//! a terminal phase. Only `status.phase` is read; the workflow itself is owned
//! by whoever submitted it.

use kube::{
    api::{Api, DynamicObject},
    discovery::ApiResource,
    Client,
};
use tracing::{debug, instrument};

use crate::error::Result;

pub const DEFAULT_WORKFLOW_NAMESPACE: &str = "argo";

pub const PHASE_SUCCEEDED: &str = "Succeeded";
pub const PHASE_FAILED: &str = "Failed";
pub const PHASE_ERROR: &str = "Error";

/// True for phases after which the workflow never changes again
pub fn is_terminal(phase: &str) -> bool {
    matches!(phase, PHASE_SUCCEEDED | PHASE_FAILED | PHASE_ERROR)
}

pub fn is_succeeded(phase: &str) -> bool {
    phase == PHASE_SUCCEEDED
}

fn workflow_resource() -> ApiResource {
    ApiResource {
        group: "argoproj.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: "Workflow".to_string(),
        plural: "workflows".to_string(),
    }
}

/// Current phase of a workflow; `None` when it does not exist or has no
/// phase yet
#[instrument(skip(client))]
pub async fn workflow_phase(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<Option<String>> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &workflow_resource());

    let phase = api.get_opt(name).await?.and_then(|wf| {
        wf.data
            .get("status")
            .and_then(|s| s.get("phase"))
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .map(String::from)
    });

    debug!("Workflow {}/{} phase: {:?}", namespace, name, phase);
    Ok(phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(is_terminal("Succeeded"));
        assert!(is_terminal("Failed"));
        assert!(is_terminal("Error"));
        assert!(!is_terminal("Running"));
        assert!(!is_terminal("Pending"));
        assert!(!is_terminal(""));
        assert!(!is_terminal("Unknown"));
    }

    #[test]
    fn test_is_succeeded() {
        assert!(is_succeeded("Succeeded"));
        assert!(!is_succeeded("Failed"));
        assert!(!is_succeeded("Error"));
        assert!(!is_succeeded("Running"));
        assert!(!is_succeeded(""));
    }

    #[test]
    fn test_workflow_resource() {
        let resource = workflow_resource();
        assert_eq!(resource.api_version, "argoproj.io/v1alpha1");
        assert_eq!(resource.plural, "workflows");
    }
}

//! Builds multi-source Application specs from resolved components

use crate::components::{ResolvedComponent, Source};

use super::types::{
    ApplicationDestination, ApplicationSource, ApplicationSpec, HelmParameter, HelmSource,
    SourceKind, SyncPolicy, DEFAULT_PROJECT, VALUES_REF,
};

/// Build the Application spec for a set of resolved components
///
/// Returns `None` when no sources were resolved; callers must skip the
/// Application entirely rather than write one with an empty source list.
pub fn build_spec(
    resolved: &[ResolvedComponent],
    server: &str,
    namespace: &str,
) -> Option<ApplicationSpec> {
    let sources: Vec<ApplicationSource> = resolved.iter().flat_map(component_sources).collect();

    if sources.is_empty() {
        return None;
    }

    Some(ApplicationSpec {
        project: DEFAULT_PROJECT.to_string(),
        sources,
        destination: ApplicationDestination {
            server: server.to_string(),
            namespace: namespace.to_string(),
        },
        sync_policy: SyncPolicy::default(),
    })
}

fn component_sources(component: &ResolvedComponent) -> Vec<ApplicationSource> {
    // A `$values/...` values file anywhere in the component turns its plain git
    // source into a values-only ref, which Argo CD must not render.
    let needs_values_ref = component.sources.iter().any(Source::uses_values_ref);

    component
        .sources
        .iter()
        .map(|source| build_source(source, needs_values_ref))
        .collect()
}

fn build_source(source: &Source, needs_values_ref: bool) -> ApplicationSource {
    let kind = if source.is_chart() {
        SourceKind::Chart(source.chart.clone())
    } else if needs_values_ref && source.helm.is_none() {
        SourceKind::Ref(VALUES_REF.to_string())
    } else {
        SourceKind::Path(source.path.clone())
    };

    let helm = source.helm.as_ref().and_then(|helm| {
        let built = HelmSource {
            release_name: Some(helm.release_name.clone()).filter(|r| !r.is_empty()),
            value_files: helm.values_files.clone(),
            // BTreeMap iteration keeps parameters sorted and the spec stable
            parameters: helm
                .parameters
                .iter()
                .map(|(name, value)| HelmParameter {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        };
        (!built.is_empty()).then_some(built)
    });

    ApplicationSource {
        repo_url: source.repo_url.clone(),
        target_revision: source.target_revision.clone(),
        kind,
        helm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::HelmConfig;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn git(repo: &str, path: &str) -> Source {
        Source {
            repo_url: repo.to_string(),
            target_revision: "main".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn chart(name: &str, helm: Option<HelmConfig>) -> Source {
        Source {
            repo_url: "https://charts.example.com".to_string(),
            target_revision: "1.0.0".to_string(),
            chart: name.to_string(),
            helm,
            ..Default::default()
        }
    }

    fn component(sources: Vec<Source>) -> ResolvedComponent {
        ResolvedComponent {
            name: "c".to_string(),
            sources,
        }
    }

    #[test]
    fn test_git_source_spec() {
        let spec = build_spec(&[component(vec![git("R", "P")])], "https://c1", "e1").unwrap();
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value,
            json!({
                "project": "default",
                "sources": [{"repoURL": "R", "path": "P", "targetRevision": "main"}],
                "destination": {"server": "https://c1", "namespace": "e1"},
                "syncPolicy": {
                    "automated": {"prune": true, "selfHeal": true},
                    "syncOptions": ["CreateNamespace=true", "ServerSideApply=true"]
                }
            })
        );
    }

    #[test]
    fn test_chart_source_without_values_ref() {
        let spec = build_spec(&[component(vec![chart("nginx", None)])], "s", "ns").unwrap();
        let source = serde_json::to_value(&spec.sources[0]).unwrap();
        assert_eq!(source["chart"], "nginx");
        assert!(source.get("path").is_none());
        assert!(source.get("ref").is_none());
        assert!(source.get("helm").is_none());
    }

    #[test]
    fn test_values_ref_turns_sibling_git_source_into_ref() {
        let helm = HelmConfig {
            release_name: "alloy".to_string(),
            values_files: vec!["$values/components/alloy/values.yaml".to_string()],
            parameters: BTreeMap::new(),
        };
        let spec = build_spec(
            &[component(vec![
                chart("alloy", Some(helm)),
                git("https://github.com/org/lab", "components/alloy"),
            ])],
            "s",
            "ns",
        )
        .unwrap();

        let git_source = serde_json::to_value(&spec.sources[1]).unwrap();
        assert_eq!(git_source["ref"], "values");
        assert!(git_source.get("path").is_none());

        let chart_source = serde_json::to_value(&spec.sources[0]).unwrap();
        assert_eq!(
            chart_source["helm"],
            json!({
                "releaseName": "alloy",
                "valueFiles": ["$values/components/alloy/values.yaml"]
            })
        );
    }

    #[test]
    fn test_values_ref_is_scoped_to_its_component() {
        let helm = HelmConfig {
            values_files: vec!["$values/x.yaml".to_string()],
            ..Default::default()
        };
        let spec = build_spec(
            &[
                component(vec![chart("a", Some(helm)), git("R", "values")]),
                component(vec![git("R2", "manifests")]),
            ],
            "s",
            "ns",
        )
        .unwrap();
        assert_eq!(spec.sources[1].kind, SourceKind::Ref("values".to_string()));
        assert_eq!(spec.sources[2].kind, SourceKind::Path("manifests".to_string()));
    }

    #[test]
    fn test_git_source_with_helm_block_keeps_path() {
        let helm = HelmConfig {
            values_files: vec!["$values/x.yaml".to_string()],
            ..Default::default()
        };
        let mut with_helm = git("R", "charts/local");
        with_helm.helm = Some(helm);
        let spec = build_spec(&[component(vec![with_helm])], "s", "ns").unwrap();
        assert_eq!(spec.sources[0].kind, SourceKind::Path("charts/local".to_string()));
    }

    #[test]
    fn test_empty_helm_block_is_omitted() {
        let spec = build_spec(
            &[component(vec![chart("nginx", Some(HelmConfig::default()))])],
            "s",
            "ns",
        )
        .unwrap();
        assert!(spec.sources[0].helm.is_none());
    }

    #[test]
    fn test_parameters_are_sorted_by_name() {
        let mut parameters = BTreeMap::new();
        parameters.insert("z.value".to_string(), "1".to_string());
        parameters.insert("a.value".to_string(), "2".to_string());
        let helm = HelmConfig {
            parameters,
            ..Default::default()
        };
        let spec = build_spec(&[component(vec![chart("c", Some(helm))])], "s", "ns").unwrap();
        let names: Vec<_> = spec.sources[0]
            .helm
            .as_ref()
            .unwrap()
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["a.value", "z.value"]);
    }

    #[test]
    fn test_no_sources_yields_none() {
        assert!(build_spec(&[], "s", "ns").is_none());
        assert!(build_spec(&[component(vec![])], "s", "ns").is_none());
    }
}

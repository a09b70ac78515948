//! Pipeline tests over the public API, no cluster required
//!
//! Parses an Experiment manifest, resolves its components through a catalog
//! and builds the Argo CD Application specs each layer would receive.

use chrono::{Duration, TimeZone, Utc};
use experiment_operator::argocd::{
    build_spec, classify, observability_component_refs, Layer, TailscaleOAuth,
};
use experiment_operator::components::{Catalog, CatalogResolver, ComponentResolver};
use experiment_operator::controller::{calculate_ttl, is_succeeded, is_terminal, should_delete};
use experiment_operator::crd::Experiment;
use kube::CustomResourceExt;
use serde_json::json;

const EXPERIMENT: &str = r#"
apiVersion: experiments.illm.io/v1alpha1
kind: Experiment
metadata:
  name: e1
  namespace: experiments
spec:
  ttlDays: 2
  workflow:
    name: bench
  targets:
    - name: t1
      cluster:
        secretRef: t1-kubeconfig
      components:
        - app: nginx
          params:
            replicaCount: "2"
      observability:
        enabled: true
        transport: tailscale
"#;

const CATALOG: &str = r#"
apps:
  nginx:
    sources:
      - repoURL: https://charts.example.com
        chart: nginx
        targetRevision: 15.0.0
        helm:
          releaseName: nginx
          valuesFiles:
            - $values/nginx/values.yaml
      - repoURL: https://git.example.com/values
        targetRevision: main
  tailscale-operator:
    sources:
      - repoURL: https://pkgs.tailscale.com/helmcharts
        chart: tailscale-operator
        targetRevision: 1.70.0
  metrics-agent:
    sources:
      - repoURL: https://grafana.github.io/helm-charts
        chart: alloy
        targetRevision: 0.6.0
configs:
  metrics-egress:
    sources:
      - repoURL: https://git.example.com/platform
        path: egress
        targetRevision: main
"#;

fn experiment() -> Experiment {
    serde_yaml::from_str(EXPERIMENT).expect("valid experiment manifest")
}

#[test]
fn crd_is_namespaced_with_status() {
    let crd = Experiment::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("experiments.experiments.illm.io"));
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.short_names, Some(vec!["exp".to_string()]));
}

#[tokio::test]
async fn layered_target_builds_three_applications() {
    let experiment = experiment();
    experiment.spec.validate().unwrap();

    let target = &experiment.spec.targets[0];
    let obs = target.observability.as_ref().unwrap();
    let refs = observability_component_refs(obs, "e1", &TailscaleOAuth::default());
    let classified = classify(&target.components, &refs);
    assert!(classified.has_layers());

    let resolver = CatalogResolver::new(Catalog::from_yaml(CATALOG).unwrap());

    for layer in Layer::ALL {
        let resolved = resolver.resolve(classified.layer(layer)).await.unwrap();
        let spec = build_spec(&resolved, "https://c1", "e1").expect("sources resolved");
        assert_eq!(spec.destination.namespace, "e1");
        assert!(!spec.sources.is_empty(), "{} layer has sources", layer);
    }

    let workload = resolver.resolve(classified.layer(Layer::Workload)).await.unwrap();
    let spec = serde_json::to_value(build_spec(&workload, "https://c1", "e1").unwrap()).unwrap();
    assert_eq!(
        spec["sources"][0]["helm"],
        json!({
            "releaseName": "nginx",
            "valueFiles": ["$values/nginx/values.yaml"],
            "parameters": [{"name": "replicaCount", "value": "2"}]
        })
    );
    assert_eq!(
        spec["sources"][1],
        json!({
            "repoURL": "https://git.example.com/values",
            "targetRevision": "main",
            "ref": "values"
        })
    );
    assert_eq!(
        Layer::Workload.application_name("e1", &target.name),
        "e1-t1"
    );
}

#[tokio::test]
async fn unknown_component_fails_resolution() {
    let resolver = CatalogResolver::new(Catalog::from_yaml(CATALOG).unwrap());
    let classified = classify(
        &[experiment_operator::crd::ComponentRef::app("does-not-exist")],
        &[],
    );
    assert!(!classified.has_layers());
    assert!(resolver.resolve(&classified.workload).await.is_err());
}

#[test]
fn experiment_lifetime_and_workflow_completion() {
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let ttl = experiment().spec.ttl_days;

    assert_eq!(calculate_ttl(created, ttl), created + Duration::days(2));
    assert!(!should_delete(created, ttl, created + Duration::days(1)));
    assert!(should_delete(created, ttl, created + Duration::days(2)));

    assert!(is_terminal("Failed") && !is_succeeded("Failed"));
    assert!(is_terminal("Succeeded") && is_succeeded("Succeeded"));
    assert!(!is_terminal("Running"));
}

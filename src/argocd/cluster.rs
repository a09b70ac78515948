//! Registration of target clusters with Argo CD
//!
//! Argo CD discovers remote clusters through secrets labelled
//! `argocd.argoproj.io/secret-type: cluster` in its own namespace. The
//! connection settings are derived from the target's kubeconfig.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::control_plane::ControlPlane;
use crate::error::{Error, Result};

pub const CLUSTER_SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";
pub const CLUSTER_SECRET_TYPE: &str = "cluster";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "experiment-operator";

/// Name of the Argo CD secret registering a cluster
pub fn cluster_secret_name(cluster: &str) -> String {
    format!("cluster-{}", cluster)
}

// ============================================================================
// Kubeconfig parsing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    #[serde(default)]
    cluster: KubeCluster,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeCluster {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeUser {
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeContext,
}

#[derive(Debug, Deserialize)]
struct KubeContext {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

impl Kubeconfig {
    fn parse(cluster: &str, raw: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(raw).map_err(|e| Error::KubeconfigError {
            cluster: cluster.to_string(),
            message: e.to_string(),
        })
    }

    /// Cluster and user selected by the current context, falling back to
    /// the first entries for single-cluster kubeconfigs
    fn selected(&self) -> (Option<&KubeCluster>, Option<&KubeUser>) {
        let context = self
            .current_context
            .as_deref()
            .and_then(|name| self.contexts.iter().find(|c| c.name == name))
            .or_else(|| self.contexts.first())
            .map(|c| &c.context);

        let cluster = match context {
            Some(ctx) => self.clusters.iter().find(|c| c.name == ctx.cluster),
            None => self.clusters.first(),
        }
        .map(|c| &c.cluster);

        let user = match context.and_then(|ctx| ctx.user.as_deref()) {
            Some(user) => self.users.iter().find(|u| u.name == user),
            None => self.users.first(),
        }
        .map(|u| &u.user);

        (cluster, user)
    }
}

/// API server URL of the kubeconfig's current context
pub fn kubeconfig_server(cluster: &str, kubeconfig: &[u8]) -> Result<String> {
    let parsed = Kubeconfig::parse(cluster, kubeconfig)?;
    parsed
        .selected()
        .0
        .and_then(|c| c.server.clone())
        .ok_or_else(|| Error::KubeconfigError {
            cluster: cluster.to_string(),
            message: "no server in current context".to_string(),
        })
}

/// Argo CD cluster connection settings (`config` key of the cluster secret)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    pub tls_client_config: TlsClientConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientConfig {
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<String>,
}

/// Derive Argo CD connection settings from a kubeconfig
///
/// Kubeconfig `*-data` fields are already base64 encoded, which is the form
/// Argo CD expects.
pub fn cluster_config(cluster: &str, kubeconfig: &[u8]) -> Result<ClusterConfig> {
    let parsed = Kubeconfig::parse(cluster, kubeconfig)?;
    let (kube_cluster, user) = parsed.selected();
    let kube_cluster = kube_cluster.ok_or_else(|| Error::KubeconfigError {
        cluster: cluster.to_string(),
        message: "no cluster entry".to_string(),
    })?;

    Ok(ClusterConfig {
        bearer_token: user.and_then(|u| u.token.clone()),
        tls_client_config: TlsClientConfig {
            insecure: kube_cluster.insecure_skip_tls_verify.unwrap_or(false),
            ca_data: kube_cluster.certificate_authority_data.clone(),
            cert_data: user.and_then(|u| u.client_certificate_data.clone()),
            key_data: user.and_then(|u| u.client_key_data.clone()),
        },
    })
}

/// Build the Argo CD cluster secret for a target cluster
pub fn build_cluster_secret(
    namespace: &str,
    cluster: &str,
    kubeconfig: &[u8],
    server: &str,
) -> Result<Secret> {
    let config = serde_json::to_vec(&cluster_config(cluster, kubeconfig)?)?;

    let mut labels = BTreeMap::new();
    labels.insert(
        CLUSTER_SECRET_TYPE_LABEL.to_string(),
        CLUSTER_SECRET_TYPE.to_string(),
    );
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let mut data = BTreeMap::new();
    data.insert("name".to_string(), ByteString(cluster.as_bytes().to_vec()));
    data.insert("server".to_string(), ByteString(server.as_bytes().to_vec()));
    data.insert("config".to_string(), ByteString(config));
    data.insert("kubeconfig".to_string(), ByteString(kubeconfig.to_vec()));

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(cluster_secret_name(cluster)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Register a cluster so Applications can target `server`
///
/// Idempotent: re-registering replaces the stored credentials.
#[instrument(skip(control_plane, kubeconfig))]
pub async fn register_cluster(
    control_plane: &dyn ControlPlane,
    cluster: &str,
    kubeconfig: &[u8],
    server: &str,
) -> Result<()> {
    let secret = build_cluster_secret(control_plane.namespace(), cluster, kubeconfig, server)?;
    control_plane.apply_cluster_secret(&secret).await?;
    info!("Registered cluster {} ({}) with Argo CD", cluster, server);
    Ok(())
}

/// Remove a cluster registration; an absent registration is not an error
#[instrument(skip(control_plane))]
pub async fn unregister_cluster(control_plane: &dyn ControlPlane, cluster: &str) -> Result<()> {
    if control_plane
        .delete_cluster_secret(&cluster_secret_name(cluster))
        .await?
    {
        info!("Unregistered cluster {} from Argo CD", cluster);
    } else {
        info!("Cluster {} was not registered", cluster);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: lab
clusters:
  - name: other
    cluster:
      server: https://other:6443
  - name: lab-cluster
    cluster:
      server: https://c1
      certificate-authority-data: Q0E=
contexts:
  - name: other
    context:
      cluster: other
      user: other-user
  - name: lab
    context:
      cluster: lab-cluster
      user: admin
users:
  - name: other-user
    user:
      token: nope
  - name: admin
    user:
      client-certificate-data: Q0VSVA==
      client-key-data: S0VZ
"#;

    #[test]
    fn test_config_follows_current_context() {
        let config = cluster_config("c1", KUBECONFIG.as_bytes()).unwrap();
        assert_eq!(config.bearer_token, None);
        assert_eq!(config.tls_client_config.ca_data.as_deref(), Some("Q0E="));
        assert_eq!(config.tls_client_config.cert_data.as_deref(), Some("Q0VSVA=="));
        assert_eq!(config.tls_client_config.key_data.as_deref(), Some("S0VZ"));
        assert!(!config.tls_client_config.insecure);
    }

    #[test]
    fn test_server_from_kubeconfig() {
        assert_eq!(
            kubeconfig_server("c1", KUBECONFIG.as_bytes()).unwrap(),
            "https://c1"
        );
    }

    #[test]
    fn test_token_only_kubeconfig() {
        let raw = r#"
clusters:
  - name: k
    cluster:
      server: https://k
      insecure-skip-tls-verify: true
users:
  - name: u
    user:
      token: abc
"#;
        let config = cluster_config("k", raw.as_bytes()).unwrap();
        assert_eq!(config.bearer_token.as_deref(), Some("abc"));
        assert!(config.tls_client_config.insecure);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["tlsClientConfig"]["insecure"], true);
        assert!(json["tlsClientConfig"].get("caData").is_none());
    }

    #[test]
    fn test_invalid_kubeconfig() {
        let err = cluster_config("bad", b"clusters: 12").unwrap_err();
        assert!(matches!(err, Error::KubeconfigError { ref cluster, .. } if cluster == "bad"));
        assert!(cluster_config("empty", b"{}").is_err());
    }

    #[test]
    fn test_cluster_secret_shape() {
        let secret = build_cluster_secret("argocd", "c1", KUBECONFIG.as_bytes(), "https://c1")
            .unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("cluster-c1"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("argocd"));
        assert_eq!(
            secret.metadata.labels.as_ref().unwrap()[CLUSTER_SECRET_TYPE_LABEL],
            "cluster"
        );

        let data = secret.data.unwrap();
        assert_eq!(data["name"].0, b"c1");
        assert_eq!(data["server"].0, b"https://c1");
        assert_eq!(data["kubeconfig"].0, KUBECONFIG.as_bytes());
        let config: ClusterConfig = serde_json::from_slice(&data["config"].0).unwrap();
        assert_eq!(config.tls_client_config.ca_data.as_deref(), Some("Q0E="));
    }
}

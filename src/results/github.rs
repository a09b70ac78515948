//! Result commits through the GitHub contents API

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{ExperimentSummary, ResultCommitter};
use crate::error::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("experiment-operator/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ExistingFile {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutFileRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

/// Commits summaries to `{path}/{experiment}.json` on a branch of a repo
#[derive(Clone, Debug)]
pub struct GitHubResultCommitter {
    http: Client,
    api_base: String,
    token: String,
    owner: String,
    repo: String,
    branch: String,
    path: String,
}

/// Split `owner/repo`
pub fn parse_repo(repository: &str) -> Result<(String, String)> {
    match repository.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::ConfigError(format!(
            "results repository must be owner/repo, got {:?}",
            repository
        ))),
    }
}

impl GitHubResultCommitter {
    pub fn new(token: &str, repository: &str, branch: &str, path: &str) -> Result<Self> {
        let (owner, repo) = parse_repo(repository)?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.to_string(),
            owner,
            repo,
            branch: branch.to_string(),
            path: path.trim_matches('/').to_string(),
        })
    }

    /// Point the committer at another API endpoint (GitHub Enterprise)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// `owner/repo`, for logging
    pub fn repo_path(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn file_path(&self, experiment: &str) -> String {
        if self.path.is_empty() {
            format!("{}.json", experiment)
        } else {
            format!("{}/{}.json", self.path, experiment)
        }
    }

    fn contents_url(&self, file_path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, self.owner, self.repo, file_path
        )
    }

    /// SHA of the existing file, `None` when it does not exist yet
    async fn existing_sha(&self, file_path: &str) -> Result<Option<String>> {
        let response = self
            .http
            .get(self.contents_url(file_path))
            .query(&[("ref", self.branch.as_str())])
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let file: ExistingFile = response.json().await?;
                Ok(Some(file.sha))
            }
            status => Err(Error::CommitError {
                path: file_path.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl ResultCommitter for GitHubResultCommitter {
    #[instrument(skip(self, summary), fields(repo = %self.repo_path()))]
    async fn commit_result(&self, experiment: &str, summary: &ExperimentSummary) -> Result<()> {
        let body = serde_json::to_vec_pretty(summary)?;
        let file_path = self.file_path(experiment);

        let sha = self.existing_sha(&file_path).await?;
        let verb = if sha.is_some() { "Update" } else { "Add" };
        debug!("{} {} on branch {}", verb, file_path, self.branch);

        let request = PutFileRequest {
            message: format!("data: {} {} experiment results", verb, experiment),
            content: STANDARD.encode(body),
            branch: &self.branch,
            sha,
        };

        let response = self
            .http
            .put(self.contents_url(&file_path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CommitError {
                path: file_path,
                status: status.as_u16(),
            });
        }

        info!("Committed results for {} to {}", experiment, file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TargetStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTENTS_PATH: &str = "/repos/acme/results/contents/site/data/e1.json";

    fn summary() -> ExperimentSummary {
        ExperimentSummary {
            name: "e1".to_string(),
            namespace: "experiments".to_string(),
            phase: "Succeeded".to_string(),
            workflow_phase: Some("Succeeded".to_string()),
            created_at: None,
            completed_at: Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap(),
            targets: vec![TargetStatus {
                name: "t1".to_string(),
                server: Some("https://c1".to_string()),
                ready: true,
                ..Default::default()
            }],
        }
    }

    fn committer(server: &MockServer) -> GitHubResultCommitter {
        GitHubResultCommitter::new("token-123", "acme/results", "main", "/site/data/")
            .unwrap()
            .with_api_base(&server.uri())
    }

    #[test]
    fn test_parse_repo() {
        assert_eq!(
            parse_repo("acme/results").unwrap(),
            ("acme".to_string(), "results".to_string())
        );
        assert!(parse_repo("acme").is_err());
        assert!(parse_repo("/results").is_err());
        assert!(parse_repo("acme/").is_err());
        assert!(parse_repo("a/b/c").is_err());
    }

    #[tokio::test]
    async fn test_commit_new_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .and(query_param("ref", "main"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({
                "message": "data: Add e1 experiment results",
                "branch": "main"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        committer(&mock_server)
            .commit_result("e1", &summary())
            .await
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let put: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert!(put.get("sha").is_none());

        let content = STANDARD.decode(put["content"].as_str().unwrap()).unwrap();
        let committed: Value = serde_json::from_slice(&content).unwrap();
        assert_eq!(committed["name"], "e1");
        assert_eq!(committed["phase"], "Succeeded");
        assert_eq!(committed["targets"][0]["server"], "https://c1");
        assert!(String::from_utf8(content).unwrap().contains("\n  "));
    }

    #[tokio::test]
    async fn test_commit_updates_existing_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "abc123"})))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({
                "message": "data: Update e1 experiment results",
                "sha": "abc123"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        committer(&mock_server)
            .commit_result("e1", &summary())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_treated_as_new_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = committer(&mock_server)
            .commit_result("e1", &summary())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommitError { status: 502, .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_rejected_commit() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&mock_server)
            .await;

        let err = committer(&mock_server)
            .commit_result("e1", &summary())
            .await
            .unwrap_err();
        match err {
            Error::CommitError { ref path, status } => {
                assert_eq!(path, "site/data/e1.json");
                assert_eq!(status, 422);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_retriable());
    }
}

//! Publication of experiment results
//!
//! When an experiment's workflow succeeds and `publishResults` is set, a JSON
//! summary is committed once to a results repository and, when configured,
//! stored in an object store.

mod github;
mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::crd::{Experiment, ExperimentStatus, TargetStatus};
use crate::error::Result;

pub use github::GitHubResultCommitter;
pub use s3::S3ResultStore;

/// Summary document written for a completed experiment
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub targets: Vec<TargetStatus>,
}

impl ExperimentSummary {
    pub fn new(experiment: &Experiment, status: &ExperimentStatus, now: DateTime<Utc>) -> Self {
        Self {
            name: experiment.metadata.name.clone().unwrap_or_default(),
            namespace: experiment.metadata.namespace.clone().unwrap_or_default(),
            phase: status.phase.to_string(),
            workflow_phase: status.workflow_phase.clone(),
            created_at: experiment.created_at(),
            completed_at: now,
            targets: status.targets.clone(),
        }
    }
}

/// Destination for experiment result summaries
#[async_trait]
pub trait ResultCommitter: Send + Sync {
    /// Create or update the summary for `experiment`
    async fn commit_result(&self, experiment: &str, summary: &ExperimentSummary) -> Result<()>;
}

/// Object store holding JSON documents by key
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write `value` as indented JSON, replacing any existing object
    async fn put_json(&self, key: &str, value: &Value) -> Result<()>;

    /// Read a JSON object; `None` when the key does not exist
    async fn get_json(&self, key: &str) -> Result<Option<Value>>;
}

/// Object key of an experiment's summary
pub fn summary_key(namespace: &str, experiment: &str) -> String {
    format!("experiments/{}/{}/summary.json", namespace, experiment)
}

/// Send a summary to every configured destination
///
/// Both destinations are attempted; the first failure is returned so the
/// whole publication is retried.
pub async fn publish_summary(
    committer: Option<&dyn ResultCommitter>,
    store: Option<&dyn ResultStore>,
    summary: &ExperimentSummary,
) -> Result<()> {
    let committed = match committer {
        Some(committer) => committer.commit_result(&summary.name, summary).await,
        None => Ok(()),
    };
    let stored = match store {
        Some(store) => {
            let value = serde_json::to_value(summary)?;
            store
                .put_json(&summary_key(&summary.namespace, &summary.name), &value)
                .await
        }
        None => Ok(()),
    };
    committed.and(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<BTreeMap<String, Value>>,
        fail: bool,
    }

    #[async_trait]
    impl ResultStore for MemoryStore {
        async fn put_json(&self, key: &str, value: &Value) -> Result<()> {
            if self.fail {
                return Err(Error::ConfigError("store down".into()));
            }
            self.objects.lock().unwrap().insert(key.to_string(), value.clone());
            Ok(())
        }

        async fn get_json(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingCommitter {
        commits: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ResultCommitter for RecordingCommitter {
        async fn commit_result(&self, experiment: &str, _summary: &ExperimentSummary) -> Result<()> {
            self.commits.lock().unwrap().push(experiment.to_string());
            if self.fail {
                return Err(Error::CommitError {
                    path: format!("site/data/{}.json", experiment),
                    status: 502,
                });
            }
            Ok(())
        }
    }

    fn summary() -> ExperimentSummary {
        ExperimentSummary {
            name: "e1".to_string(),
            namespace: "experiments".to_string(),
            phase: "Succeeded".to_string(),
            workflow_phase: Some("Succeeded".to_string()),
            created_at: None,
            completed_at: Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap(),
            targets: Vec::new(),
        }
    }

    #[test]
    fn test_summary_key() {
        assert_eq!(summary_key("experiments", "e1"), "experiments/experiments/e1/summary.json");
    }

    #[tokio::test]
    async fn test_publish_summary_to_both_destinations() {
        let committer = RecordingCommitter::default();
        let store = MemoryStore::default();

        publish_summary(Some(&committer), Some(&store), &summary())
            .await
            .unwrap();

        assert_eq!(*committer.commits.lock().unwrap(), vec!["e1".to_string()]);
        let stored = store
            .get_json(&summary_key("experiments", "e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["phase"], "Succeeded");
        assert_eq!(stored["completedAt"], "2024-03-02T08:00:00Z");
    }

    #[tokio::test]
    async fn test_publish_summary_store_only() {
        let store = MemoryStore::default();
        publish_summary(None, Some(&store), &summary()).await.unwrap();
        assert_eq!(store.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_still_stores_and_fails() {
        let committer = RecordingCommitter {
            fail: true,
            ..Default::default()
        };
        let store = MemoryStore::default();

        let err = publish_summary(Some(&committer), Some(&store), &summary())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommitError { status: 502, .. }));
        assert_eq!(store.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_fails_publication() {
        let committer = RecordingCommitter::default();
        let store = MemoryStore {
            fail: true,
            ..Default::default()
        };

        assert!(publish_summary(Some(&committer), Some(&store), &summary())
            .await
            .is_err());
        assert_eq!(committer.commits.lock().unwrap().len(), 1);
    }
}

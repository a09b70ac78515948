//! Error types for the experiment operator

use thiserror::Error;

/// Errors produced while reconciling experiments
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Operator or catalog configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Experiment spec failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Component references could not be resolved to sources
    #[error("Component resolution failed: {0}")]
    ResolveError(String),

    /// Kubeconfig could not be parsed into cluster credentials
    #[error("Invalid kubeconfig for cluster {cluster}: {message}")]
    KubeconfigError { cluster: String, message: String },

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// HTTP request to an external endpoint failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Result commit endpoint rejected the request
    #[error("Result commit failed for {path}: HTTP {status}")]
    CommitError { path: String, status: u16 },

    /// Object store request failed
    #[error("Object store error: {0}")]
    StoreError(#[from] object_store::Error),

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    FinalizerError(String),
}

impl Error {
    /// Whether the reconciler should retry quickly after this error
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::HttpError(_)
            | Error::StoreError(_)
            | Error::FinalizerError(_) => true,
            Error::CommitError { status, .. } => *status >= 500 || *status == 409,
            Error::ResolveError(_) => true,
            Error::ConfigError(_)
            | Error::ValidationError(_)
            | Error::KubeconfigError { .. }
            | Error::SerializationError(_)
            | Error::YamlError(_) => false,
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as Finalize;
        match err {
            Finalize::ApplyFailed(e) | Finalize::CleanupFailed(e) => e,
            Finalize::AddFinalizer(e) | Finalize::RemoveFinalizer(e) => {
                Error::KubeError(e)
            }
            other => Error::FinalizerError(other.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(Error::ResolveError("catalog unavailable".into()).is_retriable());
        assert!(!Error::ValidationError("no targets".into()).is_retriable());
        assert!(Error::CommitError {
            path: "site/data/e1.json".into(),
            status: 502
        }
        .is_retriable());
        assert!(!Error::CommitError {
            path: "site/data/e1.json".into(),
            status: 422
        }
        .is_retriable());
    }

    #[test]
    fn test_finalizer_apply_error_unwraps() {
        let err: Error =
            kube::runtime::finalizer::Error::ApplyFailed(Error::ConfigError("bad".into())).into();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}

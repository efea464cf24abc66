//! Error types for the Rivven console operator

use thiserror::Error;

/// Errors that can occur during console reconciliation
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A referenced object does not exist
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// A resolved secret exists but lacks a required field.
    ///
    /// Distinct from [`OperatorError::NotFound`] so callers can tell
    /// "credential absent" apart from "credential malformed".
    #[error("Secret {secret} is missing required field '{field}'")]
    MissingSecretField { secret: String, field: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    ReconcileFailed(String),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Cluster admin API operation failed
    #[error("Admin API error: {0}")]
    AdminApi(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::KubeError(_)
                | OperatorError::AdminApi(_)
                | OperatorError::ReconcileFailed(_)
        )
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        if self.is_retryable() {
            Some(std::time::Duration::from_secs(30))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::NotFound {
            kind: "Secret".to_string(),
            name: "console-user".to_string(),
            namespace: "default".to_string(),
        };
        assert!(err.to_string().contains("Secret"));
        assert!(err.to_string().contains("console-user"));
    }

    #[test]
    fn test_missing_field_is_not_notfound() {
        let err = OperatorError::MissingSecretField {
            secret: "default/connect-basic-auth".to_string(),
            field: "password".to_string(),
        };
        assert!(err.to_string().contains("missing required field"));
        assert!(err.to_string().contains("password"));
        assert!(!matches!(err, OperatorError::NotFound { .. }));
    }

    #[test]
    fn test_retryable_errors() {
        let admin_err = OperatorError::AdminApi("connection refused".to_string());
        assert!(admin_err.is_retryable());

        let config_err = OperatorError::InvalidConfig("bad spec".to_string());
        assert!(!config_err.is_retryable());

        let missing = OperatorError::MissingSecretField {
            secret: "ns/name".to_string(),
            field: "token".to_string(),
        };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_requeue_delay() {
        let retryable = OperatorError::AdminApi("timeout".to_string());
        assert!(retryable.requeue_delay().is_some());

        let not_retryable = OperatorError::InvalidConfig("test".to_string());
        assert!(not_retryable.requeue_delay().is_none());
    }
}

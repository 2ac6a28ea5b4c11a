//! Provisioning error taxonomy
//!
//! Every failure a run can end with maps onto exactly one `CauseCategory`, so
//! the final report always names the cause instead of a generic failure.

use crate::provider::ProviderError;
use crate::validation::ConfigError;
use skyforge_common::{CauseCategory, ClusterState};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the provisioning components
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Configuration failed validation (never retried)
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Caller lacks rights for the requested operation
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Provider rejected role creation
    #[error("Role creation failed: {0}")]
    RoleCreation(String),

    /// Provider rejected the cluster request (bad parameters, quota)
    #[error("Cluster creation rejected: {0}")]
    ClusterCreation(String),

    /// Network blip or rate limit, safe to retry
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Cluster entered a state it cannot recover from
    #[error("Cluster reported state {0}")]
    ClusterReportedFailure(ClusterState),

    /// Polling deadline exceeded; the cluster is left as is
    #[error("Cluster did not become active within {0:?}")]
    Timeout(Duration),

    /// Cooperative cancellation observed
    #[error("Run cancelled")]
    Cancelled,

    /// Provider rejected an alarm definition
    #[error("Monitoring setup failed: {0}")]
    Monitoring(String),

    /// Target capacity rejected (outside group bounds)
    #[error("Scaling request rejected: {0}")]
    ScalingRequest(String),

    /// Autoscaling group reference is invalid
    #[error("Autoscaling group not found: {0}")]
    ScalingGroupNotFound(String),

    /// Another run for the same cluster name holds the lock
    #[error("A provisioning run for cluster '{0}' is already in progress")]
    RunInProgress(String),

    /// Unclassified provider response
    #[error("Provider error: {0}")]
    Provider(String),
}

impl ProvisionError {
    /// Cause category reported for this error
    pub fn category(&self) -> CauseCategory {
        match self {
            Self::Config(_) => CauseCategory::Config,
            Self::Permission(_) => CauseCategory::Permission,
            Self::RoleCreation(_) => CauseCategory::RoleCreation,
            Self::ClusterCreation(_) => CauseCategory::ClusterCreation,
            Self::TransientProvider(_) => CauseCategory::Transient,
            Self::ClusterReportedFailure(_) => CauseCategory::ClusterReportedFailure,
            Self::Timeout(_) => CauseCategory::Timeout,
            Self::Cancelled => CauseCategory::Cancelled,
            Self::Monitoring(_) => CauseCategory::Monitoring,
            Self::ScalingRequest(_) => CauseCategory::ScalingRequest,
            Self::ScalingGroupNotFound(_) => CauseCategory::ScalingGroupNotFound,
            Self::RunInProgress(_) => CauseCategory::RunInProgress,
            Self::Provider(_) => CauseCategory::Provider,
        }
    }

    /// Whether the retry policy may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }

    /// Map a provider error with the stage-specific rejection variant
    ///
    /// Access and transient failures are classified the same way for every
    /// component; everything else becomes `rejected(message)`.
    pub(crate) fn from_provider(err: ProviderError, rejected: fn(String) -> Self) -> Self {
        match err {
            ProviderError::AccessDenied(msg) => Self::Permission(msg),
            ProviderError::Transient(msg) => Self::TransientProvider(msg),
            other => rejected(other.to_string()),
        }
    }
}

/// Result type alias for provisioning operations
pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(ProvisionError::TransientProvider("throttled".into()).is_retryable());
        assert!(!ProvisionError::ClusterCreation("quota".into()).is_retryable());
        assert!(!ProvisionError::Permission("denied".into()).is_retryable());
        assert!(!ProvisionError::Cancelled.is_retryable());
    }

    #[test]
    fn test_provider_error_mapping() {
        let err = ProvisionError::from_provider(
            ProviderError::AccessDenied("iam:CreateRole".into()),
            ProvisionError::RoleCreation,
        );
        assert_eq!(err.category(), CauseCategory::Permission);

        let err = ProvisionError::from_provider(
            ProviderError::Transient("503".into()),
            ProvisionError::ClusterCreation,
        );
        assert_eq!(err.category(), CauseCategory::Transient);

        let err = ProvisionError::from_provider(
            ProviderError::Rejected("bad subnet".into()),
            ProvisionError::ClusterCreation,
        );
        assert_eq!(err.category(), CauseCategory::ClusterCreation);
        assert!(err.to_string().contains("bad subnet"));
    }
}

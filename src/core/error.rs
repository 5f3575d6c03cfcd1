//! Error types for the launcher core
//!
//! Registry and executor errors carry their own retry classification so the
//! pipeline can turn them into stage errors without re-deriving it.

use reqwest::StatusCode;

use super::retry::is_retryable_status;
use crate::protocols::WorkloadStatus;

/// Workload registry errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Workload not found: {workload_id}")]
    NotFound { workload_id: String },

    #[error("Registry request to {target} failed: {message}")]
    Transport { target: String, message: String },

    #[error("Registry returned {status} for {target}: {message}")]
    Api {
        target: String,
        status: u16,
        message: String,
    },

    #[error("Rejected status transition for workload {workload_id}: {from} -> {to}")]
    InvalidTransition {
        workload_id: String,
        from: WorkloadStatus,
        to: WorkloadStatus,
    },

    #[error("Status {status} is not a terminal status")]
    NotTerminal { status: WorkloadStatus },

    #[error("Registry state for workload {workload_id} is inconsistent: {message}")]
    Inconsistent {
        workload_id: String,
        message: String,
    },

    #[error("Malformed registry response: {message}")]
    Decode { message: String },
}

impl RegistryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Inconsistent { .. } => true,
            Self::Api { status, .. } => StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            Self::NotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::NotTerminal { .. }
            | Self::Decode { .. } => false,
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        let target = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_decode() {
            return RegistryError::Decode {
                message: err.to_string(),
            };
        }
        match err.status() {
            Some(status) => RegistryError::Api {
                target,
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => RegistryError::Transport {
                target,
                message: err.to_string(),
            },
        }
    }
}

/// Cluster executor errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("Unit not found: {unit_id}")]
    NotFound { unit_id: String },

    #[error("Invalid unit spec for {unit_id}: {reason}")]
    InvalidSpec { unit_id: String, reason: String },

    #[error("Cluster rejected {unit_id} with status {status}: {reason}")]
    Rejected {
        unit_id: String,
        status: u16,
        reason: String,
    },

    #[error("Cluster API unavailable: {reason}")]
    Unavailable { reason: String },
}

impl ExecutorError {
    /// Permanent errors will fail the same way on every retry. Quota and
    /// admission rejections (403) clear up on their own and stay retryable.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidSpec { .. } => true,
            Self::Rejected { status, .. } => matches!(
                StatusCode::from_u16(*status),
                Ok(StatusCode::BAD_REQUEST
                    | StatusCode::NOT_FOUND
                    | StatusCode::METHOD_NOT_ALLOWED
                    | StatusCode::UNSUPPORTED_MEDIA_TYPE
                    | StatusCode::UNPROCESSABLE_ENTITY)
            ),
            Self::NotFound { .. } | Self::Unavailable { .. } => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

impl From<kube::Error> for ExecutorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ExecutorError::Rejected {
                unit_id: String::new(),
                status: response.code,
                reason: response.message,
            },
            other => ExecutorError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_registry_error_display() {
        let error = RegistryError::InvalidTransition {
            workload_id: "wl-1".to_string(),
            from: WorkloadStatus::Success,
            to: WorkloadStatus::Failure,
        };
        assert_eq!(
            error.to_string(),
            "Rejected status transition for workload wl-1: SUCCESS -> FAILURE"
        );
    }

    #[test]
    fn test_registry_error_retry_classification() {
        let transport = RegistryError::Transport {
            target: "http://registry/api/v1/workload/claim".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(transport.is_retryable());

        let unavailable = RegistryError::Api {
            target: "claim".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        };
        assert!(unavailable.is_retryable());

        let bad_request = RegistryError::Api {
            target: "claim".to_string(),
            status: 400,
            message: "bad id".to_string(),
        };
        assert!(!bad_request.is_retryable());

        let missing = RegistryError::NotFound {
            workload_id: "wl-2".to_string(),
        };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_executor_error_permanence() {
        let invalid = ExecutorError::InvalidSpec {
            unit_id: "workload-1".to_string(),
            reason: "empty image".to_string(),
        };
        assert!(invalid.is_permanent());

        let malformed = ExecutorError::Rejected {
            unit_id: "workload-1".to_string(),
            status: 422,
            reason: "spec.containers: Required value".to_string(),
        };
        assert!(malformed.is_permanent());

        let quota = ExecutorError::Rejected {
            unit_id: "workload-1".to_string(),
            status: 403,
            reason: "exceeded quota".to_string(),
        };
        assert!(quota.is_retryable());

        let throttled = ExecutorError::Rejected {
            unit_id: "workload-1".to_string(),
            status: 429,
            reason: "slow down".to_string(),
        };
        assert!(throttled.is_retryable());

        let server = ExecutorError::Rejected {
            unit_id: "workload-1".to_string(),
            status: 500,
            reason: "etcd timeout".to_string(),
        };
        assert!(server.is_retryable());

        let down = ExecutorError::Unavailable {
            reason: "connection refused".to_string(),
        };
        assert!(down.is_retryable());
    }

    #[test]
    fn test_errors_implement_std_error() {
        let error = ExecutorError::NotFound {
            unit_id: "workload-3".to_string(),
        };
        let _: &dyn Error = &error;
        assert!(error.source().is_none());
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RegistryError>();
        assert_send_sync::<ExecutorError>();
    }
}

//! Stage trait and stage error types

use std::{fmt, time::Duration};

use async_trait::async_trait;

use super::item::PipelineItem;
use crate::core::error::{ExecutorError, RegistryError};

/// Name of a pipeline stage, used in metrics, logs and failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    Claim,
    LoadShed,
    CheckStatus,
    EnforceMutex,
    SelectArchitecture,
    LaunchPod,
}

impl StageName {
    pub const CLAIM: &'static str = "CLAIM";
    pub const LOAD_SHED: &'static str = "LOAD_SHED";
    pub const CHECK_STATUS: &'static str = "CHECK_STATUS";
    pub const ENFORCE_MUTEX: &'static str = "ENFORCE_MUTEX";
    pub const SELECT_ARCHITECTURE: &'static str = "ARCHITECTURE";
    pub const LAUNCH_POD: &'static str = "LAUNCH";

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => Self::CLAIM,
            Self::LoadShed => Self::LOAD_SHED,
            Self::CheckStatus => Self::CHECK_STATUS,
            Self::EnforceMutex => Self::ENFORCE_MUTEX,
            Self::SelectArchitecture => Self::SELECT_ARCHITECTURE,
            Self::LaunchPod => Self::LAUNCH_POD,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the failure handler treats a stage error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    /// Claim preserved; the workload is picked up again later
    Retryable,
    /// Reported to the registry as a terminal FAILURE
    NonRetryable,
    /// Not retryable, but the workload belongs to another instance or is
    /// already terminal, so this instance reports nothing
    NotOwned,
}

impl StageErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non_retryable",
            Self::NotOwned => "not_owned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage}: {message}")]
pub struct StageError {
    pub stage: StageName,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn retryable(stage: StageName, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn non_retryable(stage: StageName, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    pub fn not_owned(stage: StageName, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::NotOwned,
            message: message.into(),
        }
    }

    pub fn from_registry(stage: StageName, error: &RegistryError) -> Self {
        if error.is_retryable() {
            Self::retryable(stage, error.to_string())
        } else {
            Self::non_retryable(stage, error.to_string())
        }
    }

    pub fn from_executor(stage: StageName, error: &ExecutorError) -> Self {
        if error.is_retryable() {
            Self::retryable(stage, error.to_string())
        } else {
            Self::non_retryable(stage, error.to_string())
        }
    }

    pub fn timeout(stage: StageName, collaborator: &str, after: Duration) -> Self {
        Self::retryable(
            stage,
            format!("{} call timed out after {:?}", collaborator, after),
        )
    }

    pub fn shutdown(stage: StageName) -> Self {
        Self::retryable(stage, "launcher shutting down")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == StageErrorKind::Retryable
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// A failed item together with the error that stopped it
#[derive(Debug)]
pub struct StageFailure {
    pub error: StageError,
    pub item: PipelineItem,
}

impl StageFailure {
    pub fn new(error: StageError, item: PipelineItem) -> Self {
        Self { error, item }
    }

    /// Reason recorded with a terminal FAILURE: `"<stage>: <cause>"`
    pub fn reason(&self) -> String {
        self.error.to_string()
    }
}

/// Result of running one stage on one item
#[derive(Debug)]
pub enum StageOutcome {
    Continue(PipelineItem),
    Failed(Box<StageFailure>),
}

/// Result of running the whole pipeline on one item
#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded(PipelineItem),
    Failed(Box<StageFailure>),
}

/// A single named unit of pipeline work
#[async_trait]
pub trait Stage: Send + Sync {
    /// Apply this stage to the item, mutating its accumulated context.
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()>;

    /// Stage name for metrics and logging
    fn name(&self) -> StageName;

    /// Whether the item passes through this stage untouched. By default an
    /// item marked skip by an earlier stage skips every later stage.
    fn skips(&self, item: &PipelineItem) -> bool {
        item.is_skipped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display_is_reason() {
        let error = StageError::non_retryable(StageName::CheckStatus, "registry unreachable");
        assert_eq!(error.to_string(), "CHECK_STATUS: registry unreachable");
    }

    #[test]
    fn test_classification_from_collaborators() {
        let transient = RegistryError::Transport {
            target: "claim".to_string(),
            message: "reset".to_string(),
        };
        assert!(StageError::from_registry(StageName::Claim, &transient).is_retryable());

        let invalid = ExecutorError::InvalidSpec {
            unit_id: "workload-1".to_string(),
            reason: "no image".to_string(),
        };
        let error = StageError::from_executor(StageName::LaunchPod, &invalid);
        assert_eq!(error.kind, StageErrorKind::NonRetryable);

        assert!(StageError::shutdown(StageName::LaunchPod).is_retryable());
        assert!(!StageError::not_owned(StageName::Claim, "claimed by dp-b").is_retryable());
    }
}

//! Concrete launch stages, in pipeline order:
//! - Claim ownership in the registry
//! - Shed load
//! - Skip work that is already terminal or running
//! - Enforce one unit per mutex key
//! - Select the target architecture
//! - Create the unit

use std::{future::Future, time::Duration};

use super::stage::{StageError, StageName, StageResult};
use crate::core::error::{ExecutorResult, RegistryResult};

mod check_status;
mod claim;
mod enforce_mutex;
mod launch_pod;
mod load_shed;
mod select_architecture;

pub use check_status::CheckStatusStage;
pub use claim::ClaimStage;
pub use enforce_mutex::EnforceMutexStage;
pub use launch_pod::LaunchPodStage;
pub use load_shed::LoadShedStage;
pub use select_architecture::SelectArchitectureStage;

/// Bound a registry call; expiry is a retryable stage error.
pub(crate) async fn call_registry<T>(
    stage: StageName,
    timeout: Duration,
    call: impl Future<Output = RegistryResult<T>>,
) -> StageResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| StageError::from_registry(stage, &e)),
        Err(_) => Err(StageError::timeout(stage, "registry", timeout)),
    }
}

/// Bound an executor call; expiry is a retryable stage error.
pub(crate) async fn call_executor<T>(
    stage: StageName,
    timeout: Duration,
    call: impl Future<Output = ExecutorResult<T>>,
) -> StageResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| StageError::from_executor(stage, &e)),
        Err(_) => Err(StageError::timeout(stage, "executor", timeout)),
    }
}

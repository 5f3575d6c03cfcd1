//! Workload registry client abstraction
//!
//! The registry is the system of record for workload status. Claims are
//! atomic on the registry side, which is what settles races between
//! launcher instances.

mod http;
mod memory;

use async_trait::async_trait;

pub use http::HttpWorkloadRegistry;
pub use memory::{InMemoryWorkloadRegistry, RegistryCall, RegistryOp};

use super::error::RegistryResult;
use crate::protocols::{ClaimResult, DataplaneIdentity, WorkloadRecord, WorkloadStatus};

#[async_trait]
pub trait WorkloadRegistry: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Transition `PENDING -> CLAIMED` for `owner`.
    async fn claim(
        &self,
        workload_id: &str,
        owner: &DataplaneIdentity,
    ) -> RegistryResult<ClaimResult>;

    async fn get(&self, workload_id: &str) -> RegistryResult<WorkloadRecord>;

    async fn get_status(&self, workload_id: &str) -> RegistryResult<WorkloadStatus> {
        Ok(self.get(workload_id).await?.status)
    }

    /// Transition `CLAIMED -> RUNNING`. Idempotent for running workloads.
    async fn report_launched(&self, workload_id: &str) -> RegistryResult<()>;

    /// Record a terminal status. Re-reporting the same terminal status succeeds.
    async fn report_terminal(
        &self,
        workload_id: &str,
        status: WorkloadStatus,
        reason: Option<&str>,
    ) -> RegistryResult<()>;

    /// List workloads in any of `statuses`, optionally restricted to one owner.
    /// An empty status slice matches every status.
    async fn list(
        &self,
        owner: Option<&DataplaneIdentity>,
        statuses: &[WorkloadStatus],
    ) -> RegistryResult<Vec<WorkloadRecord>>;
}

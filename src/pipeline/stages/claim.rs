//! Claim stage: take ownership of the workload in the registry

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use super::call_registry;
use crate::{
    core::registry::WorkloadRegistry,
    observability::metrics::LauncherMetrics,
    pipeline::{
        item::PipelineItem,
        stage::{Stage, StageError, StageName, StageResult},
    },
    protocols::{ClaimResult, DataplaneIdentity},
};

pub struct ClaimStage {
    registry: Arc<dyn WorkloadRegistry>,
    identity: DataplaneIdentity,
    timeout: Duration,
}

impl ClaimStage {
    pub fn new(
        registry: Arc<dyn WorkloadRegistry>,
        identity: DataplaneIdentity,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            identity,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for ClaimStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        let name = self.name();
        let result = call_registry(
            name,
            self.timeout,
            self.registry.claim(item.workload_id(), &self.identity),
        )
        .await?;

        match &result {
            ClaimResult::Claimed => {
                LauncherMetrics::record_claimed();
                debug!(workload_id = item.workload_id(), "Claimed workload");
            }
            ClaimResult::AlreadyClaimedBySelf => {
                debug!(
                    workload_id = item.workload_id(),
                    "Workload already claimed by this launcher"
                );
            }
            ClaimResult::AlreadyClaimedByOther { owner } => {
                LauncherMetrics::record_not_claimed("claimed_by_other");
                return Err(StageError::not_owned(
                    name,
                    format!("workload claimed by {}", owner),
                ));
            }
            // Terminal status is final, so there is nothing to report back
            ClaimResult::Terminal(status) => {
                LauncherMetrics::record_not_claimed("terminal");
                return Err(StageError::not_owned(
                    name,
                    format!("workload already {}", status),
                ));
            }
        }

        item.claim = Some(result);
        Ok(())
    }

    fn name(&self) -> StageName {
        StageName::Claim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{error::RegistryError, registry::InMemoryWorkloadRegistry, registry::RegistryOp},
        pipeline::stage::StageErrorKind,
        protocols::{LaunchRequest, WorkloadStatus},
    };

    fn setup() -> (Arc<InMemoryWorkloadRegistry>, ClaimStage) {
        let registry = Arc::new(InMemoryWorkloadRegistry::new());
        let stage = ClaimStage::new(
            registry.clone(),
            DataplaneIdentity::new("dp-a"),
            Duration::from_secs(1),
        );
        (registry, stage)
    }

    #[tokio::test]
    async fn test_claim_pending_and_redelivery() {
        let (registry, stage) = setup();
        let request = LaunchRequest::new("wl-1", "{}", "");
        registry.insert_pending(&request);

        let mut item = PipelineItem::new(request.clone());
        stage.apply(&mut item).await.unwrap();
        assert_eq!(item.claim, Some(ClaimResult::Claimed));

        let mut redelivered = PipelineItem::new(request);
        stage.apply(&mut redelivered).await.unwrap();
        assert_eq!(redelivered.claim, Some(ClaimResult::AlreadyClaimedBySelf));
    }

    #[tokio::test]
    async fn test_claimed_by_other_is_not_owned() {
        let (registry, stage) = setup();
        let request = LaunchRequest::new("wl-1", "{}", "");
        registry.insert_with_status(
            &request,
            WorkloadStatus::Claimed,
            Some(&DataplaneIdentity::new("dp-b")),
        );

        let err = stage
            .apply(&mut PipelineItem::new(request))
            .await
            .unwrap_err();
        assert_eq!(err.kind, StageErrorKind::NotOwned);
        assert_eq!(err.to_string(), "CLAIM: workload claimed by dp-b");
    }

    #[tokio::test]
    async fn test_terminal_workload_fails_fast() {
        let (registry, stage) = setup();
        let request = LaunchRequest::new("wl-1", "{}", "");
        registry.insert_with_status(&request, WorkloadStatus::Success, None);

        let mut item = PipelineItem::new(request);
        let err = stage.apply(&mut item).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::NotOwned);
        assert!(item.claim.is_none());
        assert_eq!(registry.status("wl-1"), Some(WorkloadStatus::Success));
    }

    #[tokio::test]
    async fn test_registry_outage_is_retryable() {
        let (registry, stage) = setup();
        let request = LaunchRequest::new("wl-1", "{}", "");
        registry.insert_pending(&request);
        registry.fail_next(
            RegistryOp::Claim,
            RegistryError::Api {
                target: "claim".to_string(),
                status: 503,
                message: "unavailable".to_string(),
            },
        );

        let err = stage
            .apply(&mut PipelineItem::new(request))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(registry.status("wl-1"), Some(WorkloadStatus::Pending));
    }
}

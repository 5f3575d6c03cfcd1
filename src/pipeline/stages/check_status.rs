//! Check status stage: never relaunch terminal or running work

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;

use super::call_registry;
use crate::{
    core::registry::WorkloadRegistry,
    observability::metrics::LauncherMetrics,
    pipeline::{
        item::{PipelineItem, SkipReason},
        stage::{Stage, StageName, StageResult},
    },
    protocols::WorkloadStatus,
};

pub struct CheckStatusStage {
    registry: Arc<dyn WorkloadRegistry>,
    timeout: Duration,
}

impl CheckStatusStage {
    pub fn new(registry: Arc<dyn WorkloadRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

#[async_trait]
impl Stage for CheckStatusStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        let name = self.name();
        let status = call_registry(
            name,
            self.timeout,
            self.registry.get_status(item.workload_id()),
        )
        .await?;

        if status.is_terminal() {
            info!(
                workload_id = item.workload_id(),
                "Workload already {}, skipping launch", status
            );
            item.mark_skip(SkipReason::AlreadyTerminal(status));
        } else if status == WorkloadStatus::Running {
            LauncherMetrics::record_already_running(name.as_str());
            info!(
                workload_id = item.workload_id(),
                "Workload already running, skipping launch"
            );
            item.mark_skip(SkipReason::AlreadyRunning { detected_by: name });
        }

        Ok(())
    }

    fn name(&self) -> StageName {
        StageName::CheckStatus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::registry::InMemoryWorkloadRegistry,
        protocols::{DataplaneIdentity, LaunchRequest},
    };

    async fn check(status: WorkloadStatus) -> PipelineItem {
        let registry = Arc::new(InMemoryWorkloadRegistry::new());
        let request = LaunchRequest::new("wl-1", "{}", "");
        registry.insert_with_status(&request, status, Some(&DataplaneIdentity::new("dp-a")));

        let stage = CheckStatusStage::new(registry, Duration::from_secs(1));
        let mut item = PipelineItem::new(request);
        stage.apply(&mut item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_claimed_continues() {
        assert!(!check(WorkloadStatus::Claimed).await.is_skipped());
    }

    #[tokio::test]
    async fn test_terminal_marks_skip() {
        for status in [
            WorkloadStatus::Success,
            WorkloadStatus::Failure,
            WorkloadStatus::Cancelled,
        ] {
            let item = check(status).await;
            assert_eq!(item.skip_reason(), Some(&SkipReason::AlreadyTerminal(status)));
        }
    }

    #[tokio::test]
    async fn test_running_marks_skip() {
        let item = check(WorkloadStatus::Running).await;
        assert_eq!(
            item.skip_reason(),
            Some(&SkipReason::AlreadyRunning {
                detected_by: StageName::CheckStatus
            })
        );
    }
}

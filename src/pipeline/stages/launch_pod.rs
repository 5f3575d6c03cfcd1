//! Launch stage: create the unit on the cluster

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;

use super::call_executor;
use crate::{
    core::executor::{unit_id_for, ClusterExecutor, UnitSpec},
    pipeline::{
        item::PipelineItem,
        stage::{Stage, StageName, StageResult},
    },
};

pub struct LaunchPodStage {
    executor: Arc<dyn ClusterExecutor>,
    timeout: Duration,
}

impl LaunchPodStage {
    pub fn new(executor: Arc<dyn ClusterExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    fn unit_spec(item: &PipelineItem) -> UnitSpec {
        let request = item.request();
        UnitSpec {
            unit_id: unit_id_for(&request.workload_id),
            workload_id: request.workload_id.clone(),
            architecture: item.architecture.unwrap_or_default(),
            labels: request.labels.clone(),
            mutex_key: item.mutex_key.clone(),
            input_payload: request.input_payload.clone(),
            log_path: request.log_path.clone(),
        }
    }
}

#[async_trait]
impl Stage for LaunchPodStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        let spec = Self::unit_spec(item);
        let handle = call_executor(self.name(), self.timeout, self.executor.create(&spec)).await?;

        info!(
            workload_id = item.workload_id(),
            unit = %handle,
            architecture = %spec.architecture,
            executor = self.executor.name(),
            "Created unit"
        );
        item.handle = Some(handle);
        Ok(())
    }

    fn name(&self) -> StageName {
        StageName::LaunchPod
    }
}

//! Load shed stage: refuse new launches while the launcher or cluster is saturated

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    config::LoadShedConfig,
    core::load::{ClusterPressure, InflightTracker},
    pipeline::{
        item::PipelineItem,
        stage::{Stage, StageError, StageName, StageResult},
    },
};

/// Reads atomics only; never suspends.
pub struct LoadShedStage {
    inflight: Arc<InflightTracker>,
    pressure: Arc<ClusterPressure>,
    config: LoadShedConfig,
}

impl LoadShedStage {
    pub fn new(
        inflight: Arc<InflightTracker>,
        pressure: Arc<ClusterPressure>,
        config: LoadShedConfig,
    ) -> Self {
        Self {
            inflight,
            pressure,
            config,
        }
    }

    fn check(&self) -> Option<String> {
        // The item under evaluation is counted too
        let inflight = self.inflight.len();
        if inflight > self.config.max_inflight_launches {
            return Some(format!(
                "{} launches in flight exceeds limit of {}",
                inflight, self.config.max_inflight_launches
            ));
        }

        match self.pressure.active_units() {
            Some(active) if active >= self.config.max_cluster_units => Some(format!(
                "{} active cluster units at or above limit of {}",
                active, self.config.max_cluster_units
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl Stage for LoadShedStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.check() {
            Some(reason) => {
                warn!(workload_id = item.workload_id(), "Shedding launch: {}", reason);
                Err(StageError::retryable(self.name(), reason))
            }
            None => Ok(()),
        }
    }

    fn name(&self) -> StageName {
        StageName::LoadShed
    }
}

//! Enforce mutex stage: at most one unit per mutex key
//!
//! The keyed lock taken here stays with the item until it leaves the
//! pipeline, so the find/delete done here and the create done by the launch
//! stage are atomic with respect to other items sharing the key.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info};

use super::call_executor;
use crate::{
    config::{MutexConfig, MutexPolicy},
    core::{executor::ClusterExecutor, mutex::KeyedLockTable, MutexKey, UnitHandle},
    observability::{metrics::LauncherMetrics, workload_log},
    pipeline::{
        item::{PipelineItem, SkipReason},
        stage::{Stage, StageError, StageName, StageResult},
    },
};

pub struct EnforceMutexStage {
    executor: Arc<dyn ClusterExecutor>,
    locks: Arc<KeyedLockTable>,
    config: MutexConfig,
    timeout: Duration,
}

impl EnforceMutexStage {
    pub fn new(
        executor: Arc<dyn ClusterExecutor>,
        locks: Arc<KeyedLockTable>,
        config: MutexConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            locks,
            config,
            timeout,
        }
    }

    async fn delete_units(
        &self,
        item: &PipelineItem,
        key: &MutexKey,
        units: &[UnitHandle],
    ) -> StageResult<()> {
        for unit in units {
            call_executor(self.name(), self.timeout, self.executor.delete(unit)).await?;
            info!(
                workload_id = item.workload_id(),
                mutex_key = %key,
                "Deleted unit {} of workload {} for mutex key",
                unit,
                unit.workload_id
            );
        }
        LauncherMetrics::record_pods_deleted_for_mutex_key(units.len());
        workload_log::append(
            item.log_path(),
            self.name().as_str(),
            &format!(
                "deleted {} existing unit(s) for mutex key {}",
                units.len(),
                key
            ),
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl Stage for EnforceMutexStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        let name = self.name();
        let Some(key) = MutexKey::derive(&item.request().labels, &self.config.label_keys) else {
            debug!(workload_id = item.workload_id(), "No mutex key, skipping enforcement");
            return Ok(());
        };

        let guard = self.locks.acquire(&key).await;
        item.hold_mutex(guard);
        item.mutex_key = Some(key.clone());

        let units = call_executor(name, self.timeout, self.executor.find_by_mutex_key(&key)).await?;
        let (own, others): (Vec<UnitHandle>, Vec<UnitHandle>) = units
            .into_iter()
            .partition(|unit| unit.workload_id == item.workload_id());

        if !others.is_empty() {
            match self.config.policy {
                MutexPolicy::NewestWins => self.delete_units(item, &key, &others).await?,
                MutexPolicy::RejectNew => {
                    let holders: Vec<&str> =
                        others.iter().map(|u| u.workload_id.as_str()).collect();
                    return Err(StageError::non_retryable(
                        name,
                        format!(
                            "mutex key {} held by workload(s) {}",
                            key,
                            holders.join(", ")
                        ),
                    ));
                }
            }
        }

        if let Some(existing) = own.into_iter().next() {
            LauncherMetrics::record_already_running(name.as_str());
            info!(
                workload_id = item.workload_id(),
                unit = %existing,
                "Unit for workload already exists, skipping launch"
            );
            item.handle = Some(existing);
            item.mark_skip(SkipReason::AlreadyRunning { detected_by: name });
        }

        Ok(())
    }

    fn name(&self) -> StageName {
        StageName::EnforceMutex
    }
}

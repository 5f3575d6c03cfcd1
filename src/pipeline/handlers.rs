//! Terminal side effects for pipeline outcomes
//!
//! Handlers are the only components that report workload status back to the
//! registry. They never return errors: a report that still fails after
//! retries is logged and counted, and the item is dropped.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{item::PipelineItem, stage::StageErrorKind, stage::StageFailure};
use crate::{
    config::RetryConfig,
    core::{
        error::{RegistryError, RegistryResult},
        registry::WorkloadRegistry,
        retry::RetryExecutor,
    },
    observability::{metrics::LauncherMetrics, workload_log},
    protocols::WorkloadStatus,
};

const SUCCESS_LOG_SOURCE: &str = "SUCCESS";
const FAILURE_LOG_SOURCE: &str = "FAILURE";

#[async_trait]
pub trait SuccessHandler: Send + Sync {
    async fn handle(&self, item: PipelineItem);
}

#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn handle(&self, failure: StageFailure);
}

/// Bound a registry call and retry it with backoff.
async fn report_with_retry<F, Fut>(
    retry: &RetryConfig,
    timeout: Duration,
    workload_id: &str,
    what: &'static str,
    mut call: F,
) -> RegistryResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RegistryResult<()>>,
{
    RetryExecutor::execute_with_retry(
        retry,
        |_| {
            let fut = call();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(RegistryError::Transport {
                        target: what.to_string(),
                        message: format!("timed out after {:?}", timeout),
                    }),
                }
            }
        },
        RegistryError::is_retryable,
        |e, delay, attempt| {
            warn!(
                workload_id = workload_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying {} report: {}",
                what,
                e
            );
        },
    )
    .await
}

/// Reports launched workloads as RUNNING and records success metrics.
pub struct ReportingSuccessHandler {
    registry: Arc<dyn WorkloadRegistry>,
    retry: RetryConfig,
    timeout: Duration,
}

impl ReportingSuccessHandler {
    pub fn new(registry: Arc<dyn WorkloadRegistry>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            registry,
            retry,
            timeout,
        }
    }
}

#[async_trait]
impl SuccessHandler for ReportingSuccessHandler {
    async fn handle(&self, item: PipelineItem) {
        let workload_id = item.workload_id().to_string();

        if let Some(reason) = item.skip_reason() {
            // A unit found running under our claim still needs the registry
            // moved to RUNNING; terminal or already-RUNNING records do not.
            if item.has_unit() {
                self.report_launched(&workload_id).await;
            }
            LauncherMetrics::record_processed_successfully("skipped");
            info!(workload_id = %workload_id, "Workload skipped: {}", reason);
            workload_log::append(
                item.log_path(),
                SUCCESS_LOG_SOURCE,
                &format!("no launch needed: {}", reason),
            )
            .await;
            return;
        }

        let Some(handle) = item.handle.as_ref() else {
            // Custom stage lists may end without a launch stage
            LauncherMetrics::record_processed_successfully("completed");
            debug!(workload_id = %workload_id, "Pipeline completed without a unit");
            workload_log::append(item.log_path(), SUCCESS_LOG_SOURCE, "completed without a unit")
                .await;
            return;
        };

        self.report_launched(&workload_id).await;

        LauncherMetrics::record_processed_successfully("launched");
        if let Some(latency) = item.latency_since_created() {
            LauncherMetrics::record_pod_started_latency(latency);
        }
        info!(workload_id = %workload_id, unit = %handle, "Workload launched");
        workload_log::append(
            item.log_path(),
            SUCCESS_LOG_SOURCE,
            &format!("launched as {}", handle),
        )
        .await;
    }
}

impl ReportingSuccessHandler {
    async fn report_launched(&self, workload_id: &str) {
        let registry = &self.registry;
        let result = report_with_retry(
            &self.retry,
            self.timeout,
            workload_id,
            "launched",
            || registry.report_launched(workload_id),
        )
        .await;

        if let Err(e) = result {
            LauncherMetrics::record_status_report_failure(WorkloadStatus::RUNNING);
            error!(
                workload_id = workload_id,
                "Failed to report workload as running: {}", e
            );
        }
    }
}

/// Reports permanent failures as terminal FAILURE; leaves retryable ones alone.
pub struct ReportingFailureHandler {
    registry: Arc<dyn WorkloadRegistry>,
    retry: RetryConfig,
    timeout: Duration,
}

impl ReportingFailureHandler {
    pub fn new(registry: Arc<dyn WorkloadRegistry>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            registry,
            retry,
            timeout,
        }
    }
}

#[async_trait]
impl FailureHandler for ReportingFailureHandler {
    async fn handle(&self, failure: StageFailure) {
        let StageFailure { error, item } = failure;
        let workload_id = item.workload_id();
        let stage = error.stage.as_str();

        match error.kind {
            StageErrorKind::Retryable => {
                LauncherMetrics::record_transient_failure(stage);
                info!(
                    workload_id = workload_id,
                    stage = stage,
                    "Transient failure, claim kept: {}",
                    error.message
                );
                workload_log::append(
                    item.log_path(),
                    FAILURE_LOG_SOURCE,
                    &format!("transient failure, will retry: {}", error),
                )
                .await;
            }
            StageErrorKind::NotOwned => {
                LauncherMetrics::record_processed_unsuccessfully(stage);
                info!(
                    workload_id = workload_id,
                    stage = stage,
                    "Workload not owned by this launcher: {}",
                    error.message
                );
                workload_log::append(
                    item.log_path(),
                    FAILURE_LOG_SOURCE,
                    &format!("not launched: {}", error),
                )
                .await;
            }
            StageErrorKind::NonRetryable => {
                LauncherMetrics::record_processed_unsuccessfully(stage);
                let reason = error.to_string();
                error!(workload_id = workload_id, stage = stage, "Workload failed: {}", reason);
                workload_log::append(item.log_path(), FAILURE_LOG_SOURCE, &reason).await;

                let registry = &self.registry;
                let result = report_with_retry(
                    &self.retry,
                    self.timeout,
                    workload_id,
                    "failure",
                    || registry.report_terminal(workload_id, WorkloadStatus::Failure, Some(&reason)),
                )
                .await;

                match result {
                    Ok(()) => {}
                    Err(RegistryError::InvalidTransition { from, .. }) => {
                        debug!(
                            workload_id = workload_id,
                            "Workload already {}; failure not recorded", from
                        );
                    }
                    Err(e) => {
                        LauncherMetrics::record_status_report_failure(WorkloadStatus::FAILURE);
                        error!(
                            workload_id = workload_id,
                            "Failed to report workload failure: {}", e
                        );
                    }
                }
            }
        }
    }
}

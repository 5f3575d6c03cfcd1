//! Pipeline orchestrator
//!
//! Applies the ordered stages to one item at a time. Every stage error,
//! including a panic inside a stage, is turned into a [`StageFailure`] at the
//! item boundary so one bad item never takes down the worker pool.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::{
    item::PipelineItem,
    stage::{PipelineOutcome, Stage, StageError, StageFailure, StageName, StageOutcome},
};
use crate::observability::{metrics::LauncherMetrics, workload_log};

const OUTCOME_OK: &str = "ok";
const OUTCOME_SKIPPED: &str = "skipped";

#[derive(Clone)]
pub struct LaunchPipeline {
    stages: Arc<Vec<Box<dyn Stage>>>,
    shutting_down: Arc<AtomicBool>,
}

impl std::fmt::Debug for LaunchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchPipeline")
            .field("stages", &self.stage_names())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl LaunchPipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages: Arc::new(stages),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Stop items at their next stage boundary.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Launch pipeline shutting down; in-flight items stop at the next stage");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Run every stage in order. The keyed lock an item may hold is released
    /// before the outcome is returned.
    pub async fn apply(&self, mut item: PipelineItem) -> PipelineOutcome {
        for stage in self.stages.iter() {
            match self.run_stage(stage.as_ref(), item).await {
                StageOutcome::Continue(next) => item = next,
                StageOutcome::Failed(mut failure) => {
                    failure.item.release_mutex();
                    return PipelineOutcome::Failed(failure);
                }
            }
        }

        item.release_mutex();
        PipelineOutcome::Succeeded(item)
    }

    async fn run_stage(&self, stage: &dyn Stage, mut item: PipelineItem) -> StageOutcome {
        let name = stage.name();

        if stage.skips(&item) {
            debug!(
                workload_id = item.workload_id(),
                stage = name.as_str(),
                "Skipping stage"
            );
            LauncherMetrics::record_stage_duration(
                name.as_str(),
                OUTCOME_SKIPPED,
                std::time::Duration::ZERO,
            );
            return StageOutcome::Continue(item);
        }

        if self.is_shutting_down() {
            let error = StageError::shutdown(name);
            workload_log::append(item.log_path(), name.as_str(), &error.message).await;
            return StageOutcome::Failed(Box::new(StageFailure::new(error, item)));
        }

        LauncherMetrics::record_stage_started(name.as_str());
        let start = Instant::now();
        let result = AssertUnwindSafe(stage.apply(&mut item))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = format!("stage panicked: {}", panic_message(panic.as_ref()));
                error!(
                    workload_id = item.workload_id(),
                    stage = name.as_str(),
                    "{}",
                    message
                );
                Err(StageError::non_retryable(name, message))
            });
        let elapsed = start.elapsed();

        match result {
            Ok(()) => {
                LauncherMetrics::record_stage_duration(name.as_str(), OUTCOME_OK, elapsed);
                debug!(
                    workload_id = item.workload_id(),
                    stage = name.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stage completed"
                );
                let line = match item.skip_reason() {
                    Some(reason) => format!("completed; skipping remaining stages: {}", reason),
                    None => "completed".to_string(),
                };
                workload_log::append(item.log_path(), name.as_str(), &line).await;
                StageOutcome::Continue(item)
            }
            Err(error) => {
                LauncherMetrics::record_stage_duration(
                    name.as_str(),
                    error.kind.as_str(),
                    elapsed,
                );
                warn!(
                    workload_id = item.workload_id(),
                    stage = name.as_str(),
                    kind = error.kind.as_str(),
                    "Stage failed: {}",
                    error.message
                );
                workload_log::append(
                    item.log_path(),
                    name.as_str(),
                    &format!("failed ({}): {}", error.kind.as_str(), error.message),
                )
                .await;
                StageOutcome::Failed(Box::new(StageFailure::new(error, item)))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

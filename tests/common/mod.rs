// Shared harness for the integration tests. Not every test binary uses every helper.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use workload_launcher::{
    app_context::LauncherContext,
    config::{LauncherConfig, LauncherConfigBuilder, MutexPolicy, RetryConfig},
    core::{
        executor::InMemoryClusterExecutor, registry::InMemoryWorkloadRegistry, ClusterPressure,
    },
    pipeline::{
        FailureHandler, LaunchQueue, LaunchPipeline, PipelineItem, Stage, StageError,
        StageErrorKind, StageFailure, StageName, StageResult, SuccessHandler,
    },
    protocols::{DataplaneIdentity, LaunchRequest},
};

pub const DATAPLANE: &str = "dp-a";
pub const OTHER_DATAPLANE: &str = "dp-b";
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

pub fn config_builder(dataplane: &str) -> LauncherConfigBuilder {
    LauncherConfigBuilder::new()
        .dataplane_id(dataplane)
        .image("sync-worker:test")
        .max_concurrent_launches(8)
        .registry_timeout_secs(2)
        .executor_timeout_secs(2)
        .retry_config(fast_retry())
        .poller_enabled(false)
        .shutdown_grace_period_secs(5)
}

pub fn test_config(dataplane: &str) -> LauncherConfig {
    config_builder(dataplane)
        .build()
        .expect("test config is valid")
}

pub fn request(id: &str) -> LaunchRequest {
    LaunchRequest::new(id, format!("{{\"workload\":\"{}\"}}", id), "")
}

pub fn keyed_request(id: &str, connection_id: &str) -> LaunchRequest {
    request(id).with_label("connection_id", connection_id)
}

pub fn identity() -> DataplaneIdentity {
    DataplaneIdentity::new(DATAPLANE)
}

/// In-memory registry and executor wired into a real launcher context.
pub struct Harness {
    pub registry: Arc<InMemoryWorkloadRegistry>,
    pub executor: Arc<InMemoryClusterExecutor>,
    pub context: LauncherContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config(DATAPLANE))
    }

    pub fn with_policy(policy: MutexPolicy) -> Self {
        Self::with_config(
            config_builder(DATAPLANE)
                .mutex_policy(policy)
                .build()
                .expect("test config is valid"),
        )
    }

    pub fn with_config(config: LauncherConfig) -> Self {
        Self::sharing(
            config,
            Arc::new(InMemoryWorkloadRegistry::new()),
            Arc::new(InMemoryClusterExecutor::new()),
        )
    }

    /// A second launcher instance against the same registry and cluster
    pub fn sharing(
        config: LauncherConfig,
        registry: Arc<InMemoryWorkloadRegistry>,
        executor: Arc<InMemoryClusterExecutor>,
    ) -> Self {
        let context = LauncherContext::builder()
            .config(config)
            .registry(registry.clone())
            .executor(executor.clone())
            .build()
            .expect("context has every required field");
        Self {
            registry,
            executor,
            context,
        }
    }

    pub fn pressure(&self) -> &Arc<ClusterPressure> {
        &self.context.pressure
    }

    /// Run the requests through the default pipeline and reporting handlers
    /// and wait until every outcome has been handled.
    pub async fn launch_all(&self, requests: impl IntoIterator<Item = LaunchRequest>) {
        let queue = self.context.start_queue();
        submit_and_drain(&queue, requests).await;
    }
}

pub async fn submit_and_drain(
    queue: &Arc<LaunchQueue>,
    requests: impl IntoIterator<Item = LaunchRequest>,
) {
    for request in requests {
        queue.submit(request).await.expect("queue accepts requests");
    }
    queue.close();
    assert!(queue.wait(DRAIN_TIMEOUT).await, "launch queue did not drain");
}

/// What a recording handler saw for one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Succeeded { workload_id: String, launched: bool },
    Failed {
        workload_id: String,
        stage: StageName,
        kind: StageErrorKind,
    },
}

/// Success and failure handler that only records outcomes.
#[derive(Default)]
pub struct RecordingHandlers {
    outcomes: Mutex<Vec<Recorded>>,
}

impl RecordingHandlers {
    pub fn outcomes(&self) -> Vec<Recorded> {
        let mut outcomes = self.outcomes.lock().clone();
        outcomes.sort_by_key(|o| match o {
            Recorded::Succeeded { workload_id, .. } | Recorded::Failed { workload_id, .. } => {
                workload_id.clone()
            }
        });
        outcomes
    }
}

#[async_trait]
impl SuccessHandler for RecordingHandlers {
    async fn handle(&self, item: PipelineItem) {
        self.outcomes.lock().push(Recorded::Succeeded {
            workload_id: item.workload_id().to_string(),
            launched: item.has_unit(),
        });
    }
}

#[async_trait]
impl FailureHandler for RecordingHandlers {
    async fn handle(&self, failure: StageFailure) {
        self.outcomes.lock().push(Recorded::Failed {
            workload_id: failure.item.workload_id().to_string(),
            stage: failure.error.stage,
            kind: failure.error.kind,
        });
    }
}

/// Stage that fails for a fixed set of workloads and passes everything else.
pub struct ScriptedFailStage {
    pub name: StageName,
    pub fail_for: Vec<String>,
    pub kind: StageErrorKind,
}

#[async_trait]
impl Stage for ScriptedFailStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        if !self.fail_for.iter().any(|id| id == item.workload_id()) {
            return Ok(());
        }
        let message = "scripted failure";
        Err(match self.kind {
            StageErrorKind::Retryable => StageError::retryable(self.name, message),
            StageErrorKind::NonRetryable => StageError::non_retryable(self.name, message),
            StageErrorKind::NotOwned => StageError::not_owned(self.name, message),
        })
    }

    fn name(&self) -> StageName {
        self.name
    }
}

/// Queue running `pipeline` with recording handlers in place of registry reporting.
pub fn recording_queue(
    harness: &Harness,
    pipeline: LaunchPipeline,
) -> (Arc<LaunchQueue>, Arc<RecordingHandlers>) {
    let handlers = Arc::new(RecordingHandlers::default());
    let queue = LaunchQueue::new(
        &harness.context.config.queue,
        pipeline,
        harness.context.inflight.clone(),
        handlers.clone(),
        handlers.clone(),
    );
    (queue, handlers)
}

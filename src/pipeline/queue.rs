//! Bounded launch queue and worker pool
//!
//! Requests are submitted into a bounded channel. A single dispatcher task
//! acquires a semaphore permit per request and spawns one task per item, so at
//! most `max_concurrent_launches` items run the pipeline at once. Outcomes are
//! sent to two handler loops that drain them concurrently.
//!
//! A request counts as in flight from submission until its outcome is sent,
//! so the load shed stage sees queued backlog as well as running items.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{
    engine::LaunchPipeline,
    handlers::{FailureHandler, SuccessHandler},
    item::PipelineItem,
    stage::{PipelineOutcome, StageFailure},
};
use crate::{
    config::QueueConfig,
    core::load::{InflightGuard, InflightTracker},
    observability::metrics::LauncherMetrics,
    protocols::LaunchRequest,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchQueueError {
    #[error("Launch queue is closed")]
    Closed,

    #[error("Launch queue full (capacity: {capacity})")]
    Full { capacity: usize },
}

/// Entry point for anything that feeds launch requests to the pipeline.
#[async_trait]
pub trait LaunchSubmitter: Send + Sync {
    /// Submit a request, waiting for queue space.
    async fn submit(&self, request: LaunchRequest) -> Result<(), LaunchQueueError>;

    /// True once the submitter stopped accepting requests
    fn is_closed(&self) -> bool;
}

type Queued = (LaunchRequest, InflightGuard);

pub struct LaunchQueue {
    tx: Mutex<Option<mpsc::Sender<Queued>>>,
    capacity: usize,
    inflight: Arc<InflightTracker>,
    pipeline: LaunchPipeline,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LaunchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchQueue")
            .field("capacity", &self.capacity)
            .field("depth", &self.depth())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LaunchQueue {
    /// Start the dispatcher and handler loops. Must be called inside a Tokio runtime.
    pub fn new(
        config: &QueueConfig,
        pipeline: LaunchPipeline,
        inflight: Arc<InflightTracker>,
        success: Arc<dyn SuccessHandler>,
        failure: Arc<dyn FailureHandler>,
    ) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<Queued>(config.queue_size);
        let (success_tx, success_rx) = mpsc::channel::<PipelineItem>(config.queue_size);
        let (failure_tx, failure_rx) = mpsc::channel::<StageFailure>(config.queue_size);
        let concurrency = config.max_concurrent_launches;

        debug!(
            "Initializing launch queue: capacity={}, max_concurrent={}",
            config.queue_size, concurrency
        );

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let dispatch_pipeline = pipeline.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some((request, tracked)) = rx.recv().await {
                LauncherMetrics::set_queue_depth(rx.len());

                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    error!("Semaphore closed, stopping launch dispatcher");
                    break;
                };

                let pipeline = dispatch_pipeline.clone();
                let success_tx = success_tx.clone();
                let failure_tx = failure_tx.clone();
                tokio::spawn(async move {
                    Self::process(request, tracked, pipeline, success_tx, failure_tx, permit).await;
                });
            }
            LauncherMetrics::set_queue_depth(0);
            debug!("Launch dispatcher stopped");
        });

        let success_loop = tokio::spawn(async move {
            ReceiverStream::new(success_rx)
                .for_each_concurrent(concurrency, |item| {
                    let handler = Arc::clone(&success);
                    async move { handler.handle(item).await }
                })
                .await;
            debug!("Success handler loop stopped");
        });

        let failure_loop = tokio::spawn(async move {
            ReceiverStream::new(failure_rx)
                .for_each_concurrent(concurrency, |outcome| {
                    let handler = Arc::clone(&failure);
                    async move { handler.handle(outcome).await }
                })
                .await;
            debug!("Failure handler loop stopped");
        });

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            capacity: config.queue_size,
            inflight,
            pipeline,
            tasks: Mutex::new(vec![dispatcher, success_loop, failure_loop]),
        })
    }

    async fn process(
        request: LaunchRequest,
        _tracked: InflightGuard,
        pipeline: LaunchPipeline,
        success_tx: mpsc::Sender<PipelineItem>,
        failure_tx: mpsc::Sender<StageFailure>,
        _permit: OwnedSemaphorePermit,
    ) {
        LauncherMetrics::record_received();

        let item = PipelineItem::new(request);
        if let Some(latency) = item.consumer_start_latency() {
            LauncherMetrics::record_consumer_start_latency(latency);
        }
        debug!(workload_id = item.workload_id(), "Processing launch request");

        match pipeline.apply(item).await {
            PipelineOutcome::Succeeded(item) => {
                if let Err(e) = success_tx.send(item).await {
                    error!(
                        workload_id = e.0.workload_id(),
                        "Success handler loop gone, dropping outcome"
                    );
                }
            }
            PipelineOutcome::Failed(failure) => {
                if let Err(e) = failure_tx.send(*failure).await {
                    error!(
                        workload_id = e.0.item.workload_id(),
                        "Failure handler loop gone, dropping outcome"
                    );
                }
            }
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Queued>> {
        self.tx.lock().clone()
    }

    /// Submit a request, waiting while the queue is full.
    pub async fn submit(&self, request: LaunchRequest) -> Result<(), LaunchQueueError> {
        let tx = self.sender().ok_or(LaunchQueueError::Closed)?;
        let workload_id = request.workload_id.clone();
        tx.send((request, self.inflight.track()))
            .await
            .map_err(|_| LaunchQueueError::Closed)?;
        LauncherMetrics::set_queue_depth(self.depth());
        debug!(workload_id = %workload_id, depth = self.depth(), "Launch request queued");
        Ok(())
    }

    /// Submit without waiting; fails when the queue is full.
    pub fn try_submit(&self, request: LaunchRequest) -> Result<(), LaunchQueueError> {
        let tx = self.sender().ok_or(LaunchQueueError::Closed)?;
        tx.try_send((request, self.inflight.track())).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LaunchQueueError::Full {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => LaunchQueueError::Closed,
        })?;
        LauncherMetrics::set_queue_depth(self.depth());
        Ok(())
    }

    /// Requests waiting for a worker
    pub fn depth(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Stop accepting requests. Queued and running items still complete.
    pub fn close(&self) {
        if self.tx.lock().take().is_some() {
            info!("Launch queue closed");
        }
    }

    /// Wait for the dispatcher, every item and both handler loops to finish.
    /// Returns false if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return true;
        }

        // Handler loops end once every item task has dropped its outcome senders
        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Launch queue task failed: {}", e);
                    }
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Close the queue, stop items at their next stage boundary and wait up
    /// to `grace` for in-flight work to drain.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.close();
        self.pipeline.begin_shutdown();

        let drained = self.wait(grace).await;
        if drained {
            info!("Launch queue drained");
        } else {
            warn!(
                "Launch queue did not drain within {:?}; remaining claims are left for rehydration",
                grace
            );
        }
        drained
    }
}

#[async_trait]
impl LaunchSubmitter for LaunchQueue {
    async fn submit(&self, request: LaunchRequest) -> Result<(), LaunchQueueError> {
        LaunchQueue::submit(self, request).await
    }

    fn is_closed(&self) -> bool {
        LaunchQueue::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pipeline::stage::{Stage, StageError, StageName, StageResult};

    #[derive(Default)]
    struct Counting {
        succeeded: AtomicUsize,
        failed: AtomicUsize,
        retryable: AtomicUsize,
    }

    #[async_trait]
    impl SuccessHandler for Counting {
        async fn handle(&self, _item: PipelineItem) {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FailureHandler for Counting {
        async fn handle(&self, failure: StageFailure) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            if failure.error.is_retryable() {
                self.retryable.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct FailFor(&'static str);

    #[async_trait]
    impl Stage for FailFor {
        async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
            if item.workload_id() == self.0 {
                return Err(StageError::non_retryable(self.name(), "boom"));
            }
            Ok(())
        }

        fn name(&self) -> StageName {
            StageName::CheckStatus
        }
    }

    struct Slow;

    #[async_trait]
    impl Stage for Slow {
        async fn apply(&self, _item: &mut PipelineItem) -> StageResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        fn name(&self) -> StageName {
            StageName::Claim
        }
    }

    fn queue(stages: Vec<Box<dyn Stage>>, handlers: &Arc<Counting>) -> Arc<LaunchQueue> {
        LaunchQueue::new(
            &QueueConfig {
                queue_size: 16,
                max_concurrent_launches: 4,
            },
            LaunchPipeline::new(stages),
            InflightTracker::new(),
            handlers.clone(),
            handlers.clone(),
        )
    }

    #[tokio::test]
    async fn test_outcomes_routed_to_handlers() {
        let handlers = Arc::new(Counting::default());
        let queue = queue(vec![Box::new(FailFor("b"))], &handlers);

        for id in ["a", "b", "c"] {
            queue.submit(LaunchRequest::new(id, "{}", "")).await.unwrap();
        }
        queue.close();
        assert!(queue.wait(Duration::from_secs(5)).await);

        assert_eq!(handlers.succeeded.load(Ordering::SeqCst), 2);
        assert_eq!(handlers.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let handlers = Arc::new(Counting::default());
        let queue = queue(vec![], &handlers);

        queue.close();
        assert!(queue.is_closed());
        assert_eq!(
            queue.submit(LaunchRequest::new("a", "{}", "")).await,
            Err(LaunchQueueError::Closed)
        );
        assert_eq!(
            queue.try_submit(LaunchRequest::new("a", "{}", "")),
            Err(LaunchQueueError::Closed)
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_items_at_stage_boundary() {
        let handlers = Arc::new(Counting::default());
        let queue = queue(vec![Box::new(Slow), Box::new(FailFor("none"))], &handlers);

        queue.submit(LaunchRequest::new("a", "{}", "")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(queue.shutdown(Duration::from_secs(5)).await);
        assert_eq!(handlers.succeeded.load(Ordering::SeqCst), 0);
        assert_eq!(handlers.retryable.load(Ordering::SeqCst), 1);
    }
}

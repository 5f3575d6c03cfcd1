//! Pending workload poller
//!
//! Periodically lists PENDING workloads and submits them to the launch queue.
//! Delivery is at-least-once: several launcher instances may submit the same
//! workload and the registry claim decides which one launches it. Workloads
//! submitted recently are not resubmitted until `resubmit_after_secs` passes.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::LaunchSubmitter;
use crate::{
    config::PollerConfig,
    core::{
        error::{RegistryError, RegistryResult},
        registry::WorkloadRegistry,
    },
    protocols::WorkloadStatus,
};

pub struct PendingWorkloadPoller {
    registry: Arc<dyn WorkloadRegistry>,
    submitter: Arc<dyn LaunchSubmitter>,
    config: PollerConfig,
    timeout: Duration,
    recent: DashMap<String, Instant>,
}

impl PendingWorkloadPoller {
    pub fn new(
        registry: Arc<dyn WorkloadRegistry>,
        submitter: Arc<dyn LaunchSubmitter>,
        config: PollerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            submitter,
            config,
            timeout,
            recent: DashMap::new(),
        }
    }

    fn resubmit_after(&self) -> Duration {
        Duration::from_secs(self.config.resubmit_after_secs)
    }

    /// List PENDING workloads once and submit the ones not seen recently.
    /// Returns the number of requests submitted.
    pub async fn poll_once(&self) -> RegistryResult<usize> {
        let records = match tokio::time::timeout(
            self.timeout,
            self.registry.list(None, &[WorkloadStatus::Pending]),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(RegistryError::Transport {
                    target: "list".to_string(),
                    message: format!("timed out after {:?}", self.timeout),
                })
            }
        };

        let ttl = self.resubmit_after();
        self.recent.retain(|_, submitted_at| submitted_at.elapsed() < ttl);

        let mut submitted = 0;
        for record in records {
            if self.recent.contains_key(&record.id) {
                continue;
            }
            match self.submitter.submit(record.to_launch_request()).await {
                Ok(()) => {
                    self.recent.insert(record.id, Instant::now());
                    submitted += 1;
                }
                Err(e) => {
                    debug!(workload_id = %record.id, "Stopping poll: {}", e);
                    break;
                }
            }
        }

        if submitted > 0 {
            debug!("Submitted {} pending workload(s)", submitted);
        }
        Ok(submitted)
    }

    /// Poll every `interval_secs` until the submitter closes.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!("Starting pending workload poller (interval {:?})", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.submitter.is_closed() {
                    break;
                }
                if let Err(e) = self.poll_once().await {
                    warn!("Failed to poll pending workloads: {}", e);
                }
            }
            info!("Pending workload poller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        core::registry::InMemoryWorkloadRegistry,
        pipeline::queue::LaunchQueueError,
        protocols::{DataplaneIdentity, LaunchRequest},
    };

    #[derive(Default)]
    struct Recorder {
        ids: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl LaunchSubmitter for Recorder {
        async fn submit(&self, request: LaunchRequest) -> Result<(), LaunchQueueError> {
            if self.is_closed() {
                return Err(LaunchQueueError::Closed);
            }
            self.ids.lock().push(request.workload_id);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn poller(
        registry: Arc<InMemoryWorkloadRegistry>,
        recorder: Arc<Recorder>,
        resubmit_after_secs: u64,
    ) -> PendingWorkloadPoller {
        PendingWorkloadPoller::new(
            registry,
            recorder,
            PollerConfig {
                enabled: true,
                interval_secs: 1,
                resubmit_after_secs,
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_submits_pending_only_once_within_ttl() {
        let registry = Arc::new(InMemoryWorkloadRegistry::new());
        registry.insert_pending(&LaunchRequest::new("wl-1", "{}", ""));
        registry.insert_pending(&LaunchRequest::new("wl-2", "{}", ""));
        registry.insert_with_status(
            &LaunchRequest::new("wl-3", "{}", ""),
            WorkloadStatus::Claimed,
            Some(&DataplaneIdentity::new("dp-a")),
        );

        let recorder = Arc::new(Recorder::default());
        let poller = poller(registry, recorder.clone(), 60);

        assert_eq!(poller.poll_once().await.unwrap(), 2);
        assert_eq!(poller.poll_once().await.unwrap(), 0);
        assert_eq!(*recorder.ids.lock(), vec!["wl-1", "wl-2"]);
    }

    #[tokio::test]
    async fn test_resubmits_after_ttl() {
        let registry = Arc::new(InMemoryWorkloadRegistry::new());
        registry.insert_pending(&LaunchRequest::new("wl-1", "{}", ""));

        let recorder = Arc::new(Recorder::default());
        let poller = poller(registry, recorder.clone(), 0);

        assert_eq!(poller.poll_once().await.unwrap(), 1);
        assert_eq!(poller.poll_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_submitter_stops_loop() {
        let registry = Arc::new(InMemoryWorkloadRegistry::new());
        let recorder = Arc::new(Recorder::default());
        recorder.closed.store(true, Ordering::SeqCst);

        let handle = Arc::new(poller(registry, recorder, 60)).spawn();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

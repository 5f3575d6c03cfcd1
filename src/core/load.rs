//! Load signals read by the load shed stage
//!
//! Both signals are plain atomics so reading them never suspends. The local
//! in-flight count is maintained by RAII guards held by the launch queue; the
//! cluster pressure value is refreshed by a background sampler.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::executor::ClusterExecutor;
use crate::observability::metrics::LauncherMetrics;

/// Counts launch requests from submission until their outcome is handed off.
#[derive(Debug, Default)]
pub struct InflightTracker {
    count: AtomicUsize,
}

impl InflightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn track(self: &Arc<Self>) -> InflightGuard {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        LauncherMetrics::set_inflight(now);
        InflightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InflightGuard {
    tracker: Arc<InflightTracker>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let now = self.tracker.count.fetch_sub(1, Ordering::SeqCst) - 1;
        LauncherMetrics::set_inflight(now);
    }
}

/// Last sampled number of active cluster units.
#[derive(Debug, Default)]
pub struct ClusterPressure {
    active_units: AtomicUsize,
    sampled: AtomicBool,
}

impl ClusterPressure {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `None` until the first successful sample
    pub fn active_units(&self) -> Option<usize> {
        self.sampled
            .load(Ordering::Acquire)
            .then(|| self.active_units.load(Ordering::Acquire))
    }

    pub fn record(&self, active_units: usize) {
        self.active_units.store(active_units, Ordering::Release);
        self.sampled.store(true, Ordering::Release);
        LauncherMetrics::set_cluster_active_units(active_units);
    }

    /// Sample once; a failed sample keeps the previous value.
    pub async fn sample(&self, executor: &dyn ClusterExecutor, timeout: Duration) {
        match tokio::time::timeout(timeout, executor.count_active()).await {
            Ok(Ok(count)) => {
                debug!(active_units = count, "Sampled cluster pressure");
                self.record(count);
            }
            Ok(Err(e)) => warn!("Failed to sample cluster pressure: {}", e),
            Err(_) => warn!("Cluster pressure sample timed out after {:?}", timeout),
        }
    }

    /// Sample every `interval` until the returned handle is aborted.
    pub fn spawn_sampler(
        self: &Arc<Self>,
        executor: Arc<dyn ClusterExecutor>,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let pressure = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pressure.sample(executor.as_ref(), timeout).await;
            }
        })
    }
}

//! Startup rehydration
//!
//! After a crash or restart, workloads this instance had claimed but not yet
//! launched would otherwise sit in CLAIMED forever. On boot they are listed
//! from the registry and fed back through the normal submission path; claim
//! idempotency and the mutex stage make the re-run converge.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use super::queue::LaunchSubmitter;
use crate::{
    config::RetryConfig,
    core::{
        error::{RegistryError, RegistryResult},
        registry::WorkloadRegistry,
        retry::RetryExecutor,
    },
    observability::metrics::LauncherMetrics,
    protocols::{DataplaneIdentity, WorkloadStatus},
};

pub struct StartupRehydrator {
    registry: Arc<dyn WorkloadRegistry>,
    submitter: Arc<dyn LaunchSubmitter>,
    identity: DataplaneIdentity,
    retry: RetryConfig,
    timeout: Duration,
}

impl StartupRehydrator {
    pub fn new(
        registry: Arc<dyn WorkloadRegistry>,
        submitter: Arc<dyn LaunchSubmitter>,
        identity: DataplaneIdentity,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            submitter,
            identity,
            retry,
            timeout,
        }
    }

    /// Resubmit every CLAIMED workload owned by this instance. Returns the
    /// number of requests submitted.
    pub async fn rehydrate(&self) -> RegistryResult<usize> {
        let records = RetryExecutor::execute_with_retry(
            &self.retry,
            |_| async {
                match tokio::time::timeout(
                    self.timeout,
                    self.registry
                        .list(Some(&self.identity), &[WorkloadStatus::Claimed]),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RegistryError::Transport {
                        target: "list".to_string(),
                        message: format!("timed out after {:?}", self.timeout),
                    }),
                }
            },
            RegistryError::is_retryable,
            |e, delay, attempt| {
                warn!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying rehydration listing: {}",
                    e
                );
            },
        )
        .await?;

        let mut submitted = 0;
        for record in records {
            // The listing filters by owner, but a stale registry replica may not
            if !record.is_owned_by(&self.identity) {
                continue;
            }
            match self.submitter.submit(record.to_launch_request()).await {
                Ok(()) => submitted += 1,
                Err(e) => {
                    warn!(
                        workload_id = %record.id,
                        "Stopping rehydration: {}", e
                    );
                    break;
                }
            }
        }

        LauncherMetrics::record_claims_rehydrated(submitted);
        info!(
            dataplane = %self.identity,
            "Rehydrated {} claimed workload(s)", submitted
        );
        Ok(submitted)
    }
}

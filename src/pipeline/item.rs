//! Per-item pipeline context

use std::path::Path;

use chrono::{DateTime, Utc};

use super::stage::StageName;
use crate::{
    core::{executor::Architecture, mutex::KeyedLockGuard, MutexKey, UnitHandle},
    protocols::{ClaimResult, LaunchRequest, WorkloadStatus},
};

/// Why an item passes through the remaining stages untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyTerminal(WorkloadStatus),
    /// A unit for this workload already exists; `detected_by` found it
    AlreadyRunning { detected_by: StageName },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyTerminal(status) => write!(f, "already terminal ({})", status),
            Self::AlreadyRunning { detected_by } => {
                write!(f, "already running (detected by {})", detected_by)
            }
        }
    }
}

/// A launch request plus everything the stages learned about it.
///
/// Owned by exactly one task at a time.
#[derive(Debug)]
pub struct PipelineItem {
    request: LaunchRequest,
    pub claim: Option<ClaimResult>,
    pub mutex_key: Option<MutexKey>,
    pub architecture: Option<Architecture>,
    pub handle: Option<UnitHandle>,
    skip: Option<SkipReason>,
    mutex_guard: Option<KeyedLockGuard>,
    received_at_utc: DateTime<Utc>,
}

impl PipelineItem {
    pub fn new(request: LaunchRequest) -> Self {
        Self {
            request,
            claim: None,
            mutex_key: None,
            architecture: None,
            handle: None,
            skip: None,
            mutex_guard: None,
            received_at_utc: Utc::now(),
        }
    }

    pub fn request(&self) -> &LaunchRequest {
        &self.request
    }

    pub fn workload_id(&self) -> &str {
        &self.request.workload_id
    }

    pub fn log_path(&self) -> &Path {
        &self.request.log_path
    }

    /// Mark the item as skipped. The first reason wins.
    pub fn mark_skip(&mut self, reason: SkipReason) {
        if self.skip.is_none() {
            self.skip = Some(reason);
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip.as_ref()
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.is_some()
    }

    /// True once a unit exists for this workload, created here or found running
    pub fn has_unit(&self) -> bool {
        self.handle.is_some()
    }

    /// Keep the keyed lock until the item leaves the pipeline.
    pub fn hold_mutex(&mut self, guard: KeyedLockGuard) {
        self.mutex_guard = Some(guard);
    }

    pub fn holds_mutex(&self) -> bool {
        self.mutex_guard.is_some()
    }

    pub fn release_mutex(&mut self) {
        self.mutex_guard = None;
    }

    /// Time from workload creation to this launcher picking it up
    pub fn consumer_start_latency(&self) -> Option<std::time::Duration> {
        let created_at = self.request.created_at?;
        (self.received_at_utc - created_at).to_std().ok()
    }

    /// Time from workload creation until now
    pub fn latency_since_created(&self) -> Option<std::time::Duration> {
        let created_at = self.request.created_at?;
        (Utc::now() - created_at).to_std().ok()
    }
}

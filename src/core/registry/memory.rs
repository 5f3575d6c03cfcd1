//! In-process workload registry with call recording and failure injection.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::WorkloadRegistry;
use crate::{
    core::error::{RegistryError, RegistryResult},
    protocols::{ClaimResult, DataplaneIdentity, LaunchRequest, WorkloadRecord, WorkloadStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    Claim,
    Get,
    ReportLaunched,
    ReportTerminal,
    List,
}

/// One recorded registry call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Claim {
        workload_id: String,
        owner: String,
    },
    Get {
        workload_id: String,
    },
    ReportLaunched {
        workload_id: String,
    },
    ReportTerminal {
        workload_id: String,
        status: WorkloadStatus,
        reason: Option<String>,
    },
    List {
        owner: Option<String>,
        statuses: Vec<WorkloadStatus>,
    },
}

impl RegistryCall {
    pub fn op(&self) -> RegistryOp {
        match self {
            Self::Claim { .. } => RegistryOp::Claim,
            Self::Get { .. } => RegistryOp::Get,
            Self::ReportLaunched { .. } => RegistryOp::ReportLaunched,
            Self::ReportTerminal { .. } => RegistryOp::ReportTerminal,
            Self::List { .. } => RegistryOp::List,
        }
    }

    pub fn workload_id(&self) -> Option<&str> {
        match self {
            Self::Claim { workload_id, .. }
            | Self::Get { workload_id }
            | Self::ReportLaunched { workload_id }
            | Self::ReportTerminal { workload_id, .. } => Some(workload_id),
            Self::List { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, WorkloadRecord>,
    calls: Vec<RegistryCall>,
    /// One-shot failures, consumed in order per operation
    next_failures: HashMap<RegistryOp, VecDeque<RegistryError>>,
    /// Failures returned on every call for a workload
    workload_failures: HashMap<(RegistryOp, String), RegistryError>,
    /// Operations that never complete
    stalled: HashSet<RegistryOp>,
}

impl State {
    fn record_call(&mut self, call: RegistryCall) -> RegistryResult<()> {
        let op = call.op();
        let workload_id = call.workload_id().map(str::to_string);
        self.calls.push(call);

        if let Some(error) = self.next_failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some(id) = workload_id {
            if let Some(error) = self.workload_failures.get(&(op, id)) {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    fn record_mut(&mut self, workload_id: &str) -> RegistryResult<&mut WorkloadRecord> {
        self.records
            .get_mut(workload_id)
            .ok_or_else(|| RegistryError::NotFound {
                workload_id: workload_id.to_string(),
            })
    }
}

/// Registry that keeps workload records in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorkloadRegistry {
    state: Mutex<State>,
}

impl InMemoryWorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: WorkloadRecord) {
        self.state.lock().records.insert(record.id.clone(), record);
    }

    /// Register a PENDING workload for `request`.
    pub fn insert_pending(&self, request: &LaunchRequest) {
        self.insert(WorkloadRecord::pending(request));
    }

    /// Register a workload already in `status`, owned by `owner`.
    pub fn insert_with_status(
        &self,
        request: &LaunchRequest,
        status: WorkloadStatus,
        owner: Option<&DataplaneIdentity>,
    ) {
        let mut record = WorkloadRecord::pending(request);
        record.status = status;
        record.dataplane_id = owner.map(|o| o.as_str().to_string());
        self.insert(record);
    }

    pub fn record(&self, workload_id: &str) -> Option<WorkloadRecord> {
        self.state.lock().records.get(workload_id).cloned()
    }

    pub fn status(&self, workload_id: &str) -> Option<WorkloadStatus> {
        self.record(workload_id).map(|r| r.status)
    }

    /// Fail the next call of `op` with `error`. Queued errors are used in order.
    pub fn fail_next(&self, op: RegistryOp, error: RegistryError) {
        self.state
            .lock()
            .next_failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every `op` call for one workload until cleared.
    pub fn fail_workload(&self, op: RegistryOp, workload_id: &str, error: RegistryError) {
        self.state
            .lock()
            .workload_failures
            .insert((op, workload_id.to_string()), error);
    }

    /// Make every `op` call hang until cleared.
    pub fn stall(&self, op: RegistryOp) {
        self.state.lock().stalled.insert(op);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.next_failures.clear();
        state.workload_failures.clear();
        state.stalled.clear();
    }

    async fn stall_point(&self, op: RegistryOp) {
        let stalled = self.state.lock().stalled.contains(&op);
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, workload_id: &str) -> Vec<RegistryCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.workload_id() == Some(workload_id))
            .cloned()
            .collect()
    }

    pub fn count(&self, op: RegistryOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }
}

#[async_trait]
impl WorkloadRegistry for InMemoryWorkloadRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn claim(
        &self,
        workload_id: &str,
        owner: &DataplaneIdentity,
    ) -> RegistryResult<ClaimResult> {
        self.stall_point(RegistryOp::Claim).await;
        let mut state = self.state.lock();
        state.record_call(RegistryCall::Claim {
            workload_id: workload_id.to_string(),
            owner: owner.to_string(),
        })?;

        let record = state.record_mut(workload_id)?;
        if record.status.is_terminal() {
            return Ok(ClaimResult::Terminal(record.status));
        }

        if record.status == WorkloadStatus::Pending {
            record.status = WorkloadStatus::Claimed;
            record.dataplane_id = Some(owner.to_string());
            return Ok(ClaimResult::Claimed);
        }

        match record.dataplane_id.as_deref() {
            Some(current) if current == owner.as_str() => Ok(ClaimResult::AlreadyClaimedBySelf),
            Some(current) => Ok(ClaimResult::AlreadyClaimedByOther {
                owner: current.to_string(),
            }),
            None => Err(RegistryError::Inconsistent {
                workload_id: workload_id.to_string(),
                message: format!("{} without an owner", record.status),
            }),
        }
    }

    async fn get(&self, workload_id: &str) -> RegistryResult<WorkloadRecord> {
        self.stall_point(RegistryOp::Get).await;
        let mut state = self.state.lock();
        state.record_call(RegistryCall::Get {
            workload_id: workload_id.to_string(),
        })?;
        state.record_mut(workload_id).map(|r| r.clone())
    }

    async fn report_launched(&self, workload_id: &str) -> RegistryResult<()> {
        self.stall_point(RegistryOp::ReportLaunched).await;
        let mut state = self.state.lock();
        state.record_call(RegistryCall::ReportLaunched {
            workload_id: workload_id.to_string(),
        })?;

        let record = state.record_mut(workload_id)?;
        if !record.status.accepts(WorkloadStatus::Running) {
            return Err(RegistryError::InvalidTransition {
                workload_id: workload_id.to_string(),
                from: record.status,
                to: WorkloadStatus::Running,
            });
        }
        record.status = WorkloadStatus::Running;
        Ok(())
    }

    async fn report_terminal(
        &self,
        workload_id: &str,
        status: WorkloadStatus,
        reason: Option<&str>,
    ) -> RegistryResult<()> {
        self.stall_point(RegistryOp::ReportTerminal).await;
        let mut state = self.state.lock();
        state.record_call(RegistryCall::ReportTerminal {
            workload_id: workload_id.to_string(),
            status,
            reason: reason.map(str::to_string),
        })?;

        if !status.is_terminal() {
            return Err(RegistryError::NotTerminal { status });
        }

        let record = state.record_mut(workload_id)?;
        if !record.status.accepts(status) {
            return Err(RegistryError::InvalidTransition {
                workload_id: workload_id.to_string(),
                from: record.status,
                to: status,
            });
        }
        if record.status != status {
            record.status = status;
            record.termination_reason = reason.map(str::to_string);
        }
        Ok(())
    }

    async fn list(
        &self,
        owner: Option<&DataplaneIdentity>,
        statuses: &[WorkloadStatus],
    ) -> RegistryResult<Vec<WorkloadRecord>> {
        self.stall_point(RegistryOp::List).await;
        let mut state = self.state.lock();
        state.record_call(RegistryCall::List {
            owner: owner.map(|o| o.to_string()),
            statuses: statuses.to_vec(),
        })?;

        let mut records: Vec<WorkloadRecord> = state
            .records
            .values()
            .filter(|r| owner.is_none_or(|o| r.is_owned_by(o)))
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

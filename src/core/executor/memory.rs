//! In-process cluster executor with call recording.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ClusterExecutor, UnitHandle, UnitSpec};
use crate::core::{
    error::{ExecutorError, ExecutorResult},
    mutex::MutexKey,
};

/// One recorded executor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Create { workload_id: String },
    FindByMutexKey { key: MutexKey },
    Delete { unit_id: String },
    CountActive,
}

impl ExecutorCall {
    fn concerns(&self, workload_id: &str, unit_id: &str) -> bool {
        match self {
            ExecutorCall::Create { workload_id: w } => w == workload_id,
            ExecutorCall::Delete { unit_id: u } => u == unit_id,
            ExecutorCall::FindByMutexKey { .. } | ExecutorCall::CountActive => false,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    units: HashMap<String, UnitSpec>,
    calls: Vec<ExecutorCall>,
    create_failures: Vec<ExecutorError>,
    stall_creates: bool,
}

/// Cluster executor that keeps units in memory.
#[derive(Debug, Default)]
pub struct InMemoryClusterExecutor {
    state: Mutex<State>,
}

impl InMemoryClusterExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a unit as if a previous launch had created it.
    pub fn insert_unit(&self, spec: UnitSpec) -> UnitHandle {
        let handle = handle_for(&spec);
        self.state.lock().units.insert(spec.unit_id.clone(), spec);
        handle
    }

    /// Fail the next `create` calls with the given errors, in order.
    pub fn fail_next_creates(&self, errors: impl IntoIterator<Item = ExecutorError>) {
        self.state.lock().create_failures.extend(errors);
    }

    /// Make every later `create` hang.
    pub fn stall_creates(&self) {
        self.state.lock().stall_creates = true;
    }

    pub fn units(&self) -> Vec<UnitSpec> {
        let mut units: Vec<UnitSpec> = self.state.lock().units.values().cloned().collect();
        units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        units
    }

    pub fn units_for_key(&self, key: &MutexKey) -> Vec<UnitSpec> {
        self.units()
            .into_iter()
            .filter(|spec| spec.mutex_key.as_ref() == Some(key))
            .collect()
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.state.lock().calls.clone()
    }

    /// Calls that created or deleted the unit of a workload
    pub fn calls_for(&self, workload_id: &str) -> Vec<ExecutorCall> {
        let unit_id = super::unit_id_for(workload_id);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.concerns(workload_id, &unit_id))
            .cloned()
            .collect()
    }
}

fn handle_for(spec: &UnitSpec) -> UnitHandle {
    UnitHandle {
        unit_id: spec.unit_id.clone(),
        workload_id: spec.workload_id.clone(),
        namespace: None,
    }
}

#[async_trait]
impl ClusterExecutor for InMemoryClusterExecutor {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, spec: &UnitSpec) -> ExecutorResult<UnitHandle> {
        let stalled = {
            let mut state = self.state.lock();
            state.calls.push(ExecutorCall::Create {
                workload_id: spec.workload_id.clone(),
            });
            state.stall_creates
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();

        if !state.create_failures.is_empty() {
            return Err(state.create_failures.remove(0));
        }

        if let Some(existing) = state.units.get(&spec.unit_id) {
            if existing.workload_id != spec.workload_id {
                return Err(ExecutorError::Rejected {
                    unit_id: spec.unit_id.clone(),
                    status: 409,
                    reason: format!("unit owned by workload {}", existing.workload_id),
                });
            }
            return Ok(handle_for(existing));
        }

        state.units.insert(spec.unit_id.clone(), spec.clone());
        Ok(handle_for(spec))
    }

    async fn find_by_mutex_key(&self, key: &MutexKey) -> ExecutorResult<Vec<UnitHandle>> {
        let mut state = self.state.lock();
        state
            .calls
            .push(ExecutorCall::FindByMutexKey { key: key.clone() });

        let mut handles: Vec<UnitHandle> = state
            .units
            .values()
            .filter(|spec| spec.mutex_key.as_ref() == Some(key))
            .map(handle_for)
            .collect();
        handles.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(handles)
    }

    async fn delete(&self, handle: &UnitHandle) -> ExecutorResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ExecutorCall::Delete {
            unit_id: handle.unit_id.clone(),
        });
        state.units.remove(&handle.unit_id);
        Ok(())
    }

    async fn count_active(&self) -> ExecutorResult<usize> {
        let mut state = self.state.lock();
        state.calls.push(ExecutorCall::CountActive);
        Ok(state.units.len())
    }
}

//! Core abstractions for the workload launcher
//!
//! This module contains the collaborators the launch pipeline talks to and the
//! shared primitives it is built from:
//! - Workload registry client trait and implementations
//! - Cluster executor trait and implementations
//! - Error types with retry classification
//! - Keyed mutex table and load signals

pub mod error;
pub mod executor;
pub mod load;
pub mod mutex;
pub mod registry;
pub mod retry;

pub use error::{ExecutorError, ExecutorResult, RegistryError, RegistryResult};
pub use executor::{
    unit_id_for, Architecture, ClusterExecutor, InMemoryClusterExecutor, KubernetesExecutor,
    UnitHandle, UnitSpec,
};
pub use load::{ClusterPressure, InflightGuard, InflightTracker};
pub use mutex::{KeyedLockGuard, KeyedLockTable, MutexKey};
pub use registry::{HttpWorkloadRegistry, InMemoryWorkloadRegistry, WorkloadRegistry};
pub use retry::{is_retryable_status, BackoffCalculator, RetryExecutor};

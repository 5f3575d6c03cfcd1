// Data model shared by the pipeline and the registry/executor clients

pub mod registry_api;
pub mod workload;

pub use workload::{ClaimResult, DataplaneIdentity, LaunchRequest, WorkloadRecord, WorkloadStatus};

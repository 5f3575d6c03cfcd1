//! Wire types for the workload registry HTTP API.

use serde::{Deserialize, Serialize};

use super::workload::{WorkloadRecord, WorkloadStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub workload_id: String,
    pub dataplane_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub claimed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdRequest {
    pub workload_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalReportRequest {
    pub workload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Component reporting the transition
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkloadsRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataplane: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<WorkloadStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListWorkloadsResponse {
    #[serde(default)]
    pub workloads: Vec<WorkloadRecord>,
}

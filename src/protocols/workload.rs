use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a workload as tracked by the workload registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadStatus {
    Pending,
    Claimed,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl WorkloadStatus {
    pub const PENDING: &'static str = "PENDING";
    pub const CLAIMED: &'static str = "CLAIMED";
    pub const RUNNING: &'static str = "RUNNING";
    pub const SUCCESS: &'static str = "SUCCESS";
    pub const FAILURE: &'static str = "FAILURE";
    pub const CANCELLED: &'static str = "CANCELLED";

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => Self::PENDING,
            Self::Claimed => Self::CLAIMED,
            Self::Running => Self::RUNNING,
            Self::Success => Self::SUCCESS,
            Self::Failure => Self::FAILURE,
            Self::Cancelled => Self::CANCELLED,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    /// Whether a registry holding `self` accepts a write of `next`.
    ///
    /// Terminal states only accept an identical re-write.
    pub fn accepts(&self, next: WorkloadStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        match (self, next) {
            (Self::Pending, Self::Claimed) => true,
            (Self::Claimed, Self::Claimed | Self::Running) => true,
            (Self::Running, Self::Running) => true,
            (_, next) => next.is_terminal(),
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            Self::PENDING => Ok(Self::Pending),
            Self::CLAIMED => Ok(Self::Claimed),
            Self::RUNNING | "LAUNCHED" => Ok(Self::Running),
            Self::SUCCESS => Ok(Self::Success),
            Self::FAILURE => Ok(Self::Failure),
            Self::CANCELLED => Ok(Self::Cancelled),
            other => Err(format!("unknown workload status '{}'", other)),
        }
    }
}

/// Identity of this launcher instance. Read once from configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataplaneIdentity(String);

impl DataplaneIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataplaneIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound request to launch a workload. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub workload_id: String,
    pub input_payload: String,
    /// Placement and mutex-key labels, kept in key order so derivations are stable
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub log_path: PathBuf,
    /// Set by the producer; drives producer-to-consumer latency metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl LaunchRequest {
    pub fn new(
        workload_id: impl Into<String>,
        input_payload: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workload_id: workload_id.into(),
            input_payload: input_payload.into(),
            labels: BTreeMap::new(),
            log_path: log_path.into(),
            created_at: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Workload as stored by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRecord {
    pub id: String,
    pub status: WorkloadStatus,
    /// Launcher instance holding the claim, if any
    #[serde(default)]
    pub dataplane_id: Option<String>,
    #[serde(default)]
    pub input_payload: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub log_path: PathBuf,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

impl WorkloadRecord {
    pub fn pending(request: &LaunchRequest) -> Self {
        Self {
            id: request.workload_id.clone(),
            status: WorkloadStatus::Pending,
            dataplane_id: None,
            input_payload: request.input_payload.clone(),
            labels: request.labels.clone(),
            log_path: request.log_path.clone(),
            created_at: request.created_at,
            termination_reason: None,
        }
    }

    pub fn is_owned_by(&self, identity: &DataplaneIdentity) -> bool {
        self.dataplane_id.as_deref() == Some(identity.as_str())
    }

    /// Rebuilds the launch request this record was created from.
    pub fn to_launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            workload_id: self.id.clone(),
            input_payload: self.input_payload.clone(),
            labels: self.labels.clone(),
            log_path: self.log_path.clone(),
            created_at: self.created_at,
        }
    }
}

/// Result of asking the registry to claim a workload for a launcher instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    /// Redelivery after a crash: this instance already holds the claim
    AlreadyClaimedBySelf,
    AlreadyClaimedByOther { owner: String },
    Terminal(WorkloadStatus),
}

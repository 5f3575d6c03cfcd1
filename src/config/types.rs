use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use super::ConfigResult;
use crate::{core::executor::Architecture, protocols::DataplaneIdentity};

/// Main launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Identity of this launcher instance, used for claims and as a metric tag
    pub dataplane_id: String,
    pub queue: QueueConfig,
    pub load_shed: LoadShedConfig,
    pub mutex: MutexConfig,
    pub architecture: ArchitectureConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub registry: RegistryConfig,
    pub kubernetes: KubernetesConfig,
    pub poller: PollerConfig,
    pub metrics: Option<MetricsConfig>,
    pub log_dir: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_json: bool,
    pub shutdown_grace_period_secs: u64,
    /// Re-inject CLAIMED workloads owned by this instance on startup
    pub rehydrate_on_startup: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            dataplane_id: String::new(),
            queue: QueueConfig::default(),
            load_shed: LoadShedConfig::default(),
            mutex: MutexConfig::default(),
            architecture: ArchitectureConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            registry: RegistryConfig::default(),
            kubernetes: KubernetesConfig::default(),
            poller: PollerConfig::default(),
            metrics: None,
            log_dir: None,
            log_level: None,
            log_json: false,
            shutdown_grace_period_secs: 180,
            rehydrate_on_startup: true,
        }
    }
}

impl LauncherConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        crate::config::validation::ConfigValidator::validate(self)
    }

    pub fn dataplane_identity(&self) -> DataplaneIdentity {
        DataplaneIdentity::new(self.dataplane_id.trim())
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }
}

/// Launch queue and worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bounded input queue capacity; submitters wait when it is full
    pub queue_size: usize,
    /// Items processed concurrently
    pub max_concurrent_launches: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            max_concurrent_launches: 32,
        }
    }
}

/// Thresholds checked by the load shed stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadShedConfig {
    pub enabled: bool,
    /// Queued plus running launch requests above which new items are shed
    pub max_inflight_launches: usize,
    /// Active cluster units at or above which new items are shed
    pub max_cluster_units: usize,
    /// How often the background sampler refreshes the cluster unit count
    pub sample_interval_secs: u64,
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_inflight_launches: 64,
            max_cluster_units: 500,
            sample_interval_secs: 10,
        }
    }
}

/// What to do when a unit already runs under the mutex key of a new workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutexPolicy {
    /// Delete the running units, then launch the new workload
    #[default]
    NewestWins,
    /// Fail the new workload
    RejectNew,
}

impl MutexPolicy {
    pub const NEWEST_WINS: &'static str = "newest_wins";
    pub const REJECT_NEW: &'static str = "reject_new";

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewestWins => Self::NEWEST_WINS,
            Self::RejectNew => Self::REJECT_NEW,
        }
    }
}

impl fmt::Display for MutexPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutexPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            Self::NEWEST_WINS => Ok(Self::NewestWins),
            Self::REJECT_NEW => Ok(Self::RejectNew),
            other => Err(format!("unknown mutex policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutexConfig {
    /// Ordered label keys; the first present on a request names its mutex key
    pub label_keys: Vec<String>,
    pub policy: MutexPolicy,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            label_keys: vec!["connection_id".to_string()],
            policy: MutexPolicy::NewestWins,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub label_key: String,
    pub default: Architecture,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            label_key: "launcher.io/architecture".to_string(),
            default: Architecture::Amd64,
        }
    }
}

/// Per-call timeouts for external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub registry_timeout_secs: u64,
    pub executor_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            registry_timeout_secs: 10,
            executor_timeout_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn registry(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    pub fn executor(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }
}

/// Retry configuration for registry status reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f32,
    /// D' = D * (1 + U[-j, +j]) where j is jitter factor
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

fn default_retry_jitter_factor() -> f32 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the workload registry API
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Namespace for workload pods; the client's default namespace when unset
    pub namespace: Option<String>,
    /// Container image that runs workloads
    pub image: String,
    pub image_pull_policy: Option<String>,
    pub service_account: Option<String>,
}

/// Pending workload poller, the built-in input transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Suppress resubmitting a workload id for this long after it was queued
    pub resubmit_after_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            resubmit_after_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub port: u16,
    pub host: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: 29000,
            host: "0.0.0.0".to_string(),
        }
    }
}

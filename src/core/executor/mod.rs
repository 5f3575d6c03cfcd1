//! Cluster executor abstraction
//!
//! A cluster executor creates, finds and deletes units of work (pods) on the
//! cluster scheduler. Each unit is identified by a stable id derived from the
//! workload id, so creating the same workload twice names the same unit.

mod kubernetes;
mod memory;

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use kubernetes::KubernetesExecutor;
pub use memory::{ExecutorCall, InMemoryClusterExecutor};

use super::{error::ExecutorResult, mutex::MutexKey};

/// Target CPU architecture for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    Amd64,
    Arm64,
}

impl Architecture {
    pub const AMD64: &'static str = "amd64";
    pub const ARM64: &'static str = "arm64";

    /// Value used for the `kubernetes.io/arch` node selector
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => Self::AMD64,
            Self::Arm64 => Self::ARM64,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x86-64" => Ok(Self::Amd64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            other => Err(format!("unsupported architecture '{}'", other)),
        }
    }
}

/// Everything the executor needs to create a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub unit_id: String,
    pub workload_id: String,
    pub architecture: Architecture,
    pub labels: BTreeMap<String, String>,
    pub mutex_key: Option<MutexKey>,
    pub input_payload: String,
    pub log_path: PathBuf,
}

/// Executor-assigned reference to a created unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitHandle {
    pub unit_id: String,
    pub workload_id: String,
    pub namespace: Option<String>,
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.unit_id),
            None => f.write_str(&self.unit_id),
        }
    }
}

/// Maximum length of a DNS-1123 label, which pod names must satisfy
const MAX_UNIT_ID_LEN: usize = 63;

const UNIT_ID_PREFIX: &str = "workload-";

/// Length of the `-<16 hex digits>` suffix appended to rewritten ids
const HASH_SUFFIX_LEN: usize = 17;

/// FNV-1a over the raw bytes; stable across processes and releases.
pub(crate) fn stable_hash(value: &str) -> u64 {
    value.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Stable unit id for a workload: `workload-<id>`.
///
/// Ids that are already lowercase DNS labels are used as is. Anything else is
/// sanitized and suffixed with a hash of the raw id, so distinct workload ids
/// never share a unit id.
pub fn unit_id_for(workload_id: &str) -> String {
    let usable = !workload_id.is_empty()
        && UNIT_ID_PREFIX.len() + workload_id.len() <= MAX_UNIT_ID_LEN
        && !workload_id.ends_with('-')
        && workload_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if usable {
        return format!("{}{}", UNIT_ID_PREFIX, workload_id);
    }

    let mut id = String::with_capacity(MAX_UNIT_ID_LEN);
    id.push_str(UNIT_ID_PREFIX);
    for c in workload_id.chars() {
        if id.len() >= MAX_UNIT_ID_LEN - HASH_SUFFIX_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else {
            id.push('-');
        }
    }
    let prefix = id.trim_end_matches('-');
    format!("{}-{:016x}", prefix, stable_hash(workload_id))
}

/// Trait over the container/pod scheduler
#[async_trait]
pub trait ClusterExecutor: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Create a unit. Creating a unit that already exists for the same
    /// workload returns its handle.
    async fn create(&self, spec: &UnitSpec) -> ExecutorResult<UnitHandle>;

    /// Find units tagged with the mutex key
    async fn find_by_mutex_key(&self, key: &MutexKey) -> ExecutorResult<Vec<UnitHandle>>;

    /// Delete a unit. Deleting a unit that no longer exists succeeds.
    async fn delete(&self, handle: &UnitHandle) -> ExecutorResult<()>;

    /// Number of units currently active, used as the cluster pressure signal
    async fn count_active(&self) -> ExecutorResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_dns_label(id: &str) -> bool {
        id.len() <= MAX_UNIT_ID_LEN
            && !id.ends_with('-')
            && id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }

    #[test]
    fn test_unit_id_is_dns_label() {
        assert_eq!(unit_id_for("wl-1"), "workload-wl-1");

        for raw in [
            "abc_123".to_string(),
            "Sync.Job".to_string(),
            "x".repeat(200),
            format!("{}_", "y".repeat(53)),
            "trailing-".to_string(),
            String::new(),
        ] {
            let id = unit_id_for(&raw);
            assert!(is_dns_label(&id), "{} -> {}", raw, id);
            assert!(id.starts_with(UNIT_ID_PREFIX));
        }
        assert_eq!(unit_id_for(&"x".repeat(200)).len(), MAX_UNIT_ID_LEN);
    }

    #[test]
    fn test_unit_ids_do_not_collide() {
        let long_a = format!("{}a", "x".repeat(80));
        let long_b = format!("{}b", "x".repeat(80));
        let pairs = [
            ("sync_1", "sync-1"),
            ("Job-A", "job-a"),
            ("a.b", "a_b"),
            ("abc-", "abc"),
            (long_a.as_str(), long_b.as_str()),
        ];
        for (a, b) in pairs {
            assert_ne!(unit_id_for(a), unit_id_for(b), "{} vs {}", a, b);
        }
        assert_eq!(unit_id_for("Sync.Job"), unit_id_for("Sync.Job"));
    }

    #[test]
    fn test_architecture_aliases() {
        assert_eq!("x86_64".parse::<Architecture>(), Ok(Architecture::Amd64));
        assert_eq!("AARCH64".parse::<Architecture>(), Ok(Architecture::Arm64));
        assert_eq!(" arm64 ".parse::<Architecture>(), Ok(Architecture::Arm64));
        assert!("riscv64".parse::<Architecture>().is_err());
    }
}

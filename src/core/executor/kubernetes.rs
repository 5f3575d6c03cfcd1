//! Kubernetes-backed cluster executor: one pod per workload.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Container, EnvVar, Pod, PodSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};
use tracing::{debug, info, warn};

use super::{stable_hash, ClusterExecutor, UnitHandle, UnitSpec};
use crate::{
    config::KubernetesConfig,
    core::{
        error::{ExecutorError, ExecutorResult},
        mutex::MutexKey,
    },
    protocols::DataplaneIdentity,
};

pub const LABEL_WORKLOAD_ID: &str = "launcher.io/workload-id";
pub const LABEL_MUTEX_KEY: &str = "launcher.io/mutex-key";
pub const LABEL_DATAPLANE: &str = "launcher.io/dataplane";
pub const ANNOTATION_WORKLOAD_ID: &str = "launcher.io/workload-id";
pub const ANNOTATION_LOG_PATH: &str = "launcher.io/log-path";
const LABEL_ARCH: &str = "kubernetes.io/arch";
const MAX_LABEL_VALUE_LEN: usize = 63;
const CONTAINER_NAME: &str = "main";

/// Creates workload pods in a single namespace.
pub struct KubernetesExecutor {
    pods: Api<Pod>,
    namespace: Option<String>,
    config: KubernetesConfig,
    identity: DataplaneIdentity,
}

impl std::fmt::Debug for KubernetesExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesExecutor")
            .field("namespace", &self.namespace)
            .field("image", &self.config.image)
            .finish()
    }
}

impl KubernetesExecutor {
    pub fn new(client: Client, config: KubernetesConfig, identity: DataplaneIdentity) -> Self {
        let pods: Api<Pod> = match &config.namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::default_namespaced(client),
        };
        Self {
            pods,
            namespace: config.namespace.clone(),
            config,
            identity,
        }
    }

    /// Build a client from the ambient kubeconfig or in-cluster service account.
    pub async fn connect(
        config: KubernetesConfig,
        identity: DataplaneIdentity,
    ) -> ExecutorResult<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client = Client::try_default().await?;
        info!(
            "Connected to Kubernetes | namespace: {} | image: {}",
            config.namespace.as_deref().unwrap_or("<default>"),
            config.image
        );
        Ok(Self::new(client, config, identity))
    }

    fn build_pod(&self, spec: &UnitSpec) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_WORKLOAD_ID.to_string(),
            label_value(&spec.workload_id),
        );
        labels.insert(
            LABEL_DATAPLANE.to_string(),
            label_value(self.identity.as_str()),
        );
        if let Some(key) = &spec.mutex_key {
            labels.insert(LABEL_MUTEX_KEY.to_string(), label_value(key.as_str()));
        }

        // Request labels are free-form; annotations accept any value
        let mut annotations = spec.labels.clone();
        annotations.insert(
            ANNOTATION_WORKLOAD_ID.to_string(),
            spec.workload_id.clone(),
        );
        annotations.insert(
            ANNOTATION_LOG_PATH.to_string(),
            spec.log_path.display().to_string(),
        );

        let env = vec![
            env_var("WORKLOAD_ID", &spec.workload_id),
            env_var("WORKLOAD_INPUT", &spec.input_payload),
            env_var("WORKLOAD_LOG_PATH", &spec.log_path.display().to_string()),
        ];

        let mut node_selector = BTreeMap::new();
        node_selector.insert(
            LABEL_ARCH.to_string(),
            spec.architecture.as_str().to_string(),
        );

        Pod {
            metadata: ObjectMeta {
                name: Some(spec.unit_id.clone()),
                namespace: self.namespace.clone(),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: Some(self.config.image.clone()),
                    image_pull_policy: self.config.image_pull_policy.clone(),
                    env: Some(env),
                    ..Default::default()
                }],
                node_selector: Some(node_selector),
                restart_policy: Some("Never".to_string()),
                service_account_name: self.config.service_account.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn handle_from_pod(&self, pod: &Pod) -> Option<UnitHandle> {
        let unit_id = pod.metadata.name.clone()?;
        let workload_id = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_WORKLOAD_ID))
            .cloned()?;
        Some(UnitHandle {
            unit_id,
            workload_id,
            namespace: pod.metadata.namespace.clone().or_else(|| self.namespace.clone()),
        })
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_VALUE_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.chars().next().is_none_or(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_none_or(|c| c.is_ascii_alphanumeric())
}

/// Map an arbitrary string to a valid, deterministic label value.
pub fn label_value(value: &str) -> String {
    if is_valid_label_value(value) {
        return value.to_string();
    }
    let sanitized: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_LABEL_VALUE_LEN - 17)
        .collect();
    let prefix = sanitized.trim_matches('_');
    if prefix.is_empty() {
        format!("{:016x}", stable_hash(value))
    } else {
        format!("{}-{:016x}", prefix, stable_hash(value))
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

fn with_unit(err: kube::Error, unit_id: &str) -> ExecutorError {
    match ExecutorError::from(err) {
        ExecutorError::Rejected { status, reason, .. } => ExecutorError::Rejected {
            unit_id: unit_id.to_string(),
            status,
            reason,
        },
        other => other,
    }
}

#[async_trait]
impl ClusterExecutor for KubernetesExecutor {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create(&self, spec: &UnitSpec) -> ExecutorResult<UnitHandle> {
        if self.config.image.trim().is_empty() {
            return Err(ExecutorError::InvalidSpec {
                unit_id: spec.unit_id.clone(),
                reason: "no container image configured".to_string(),
            });
        }

        let pod = self.build_pod(spec);
        match self.pods.create(&PostParams::default(), &pod).await {
            Ok(created) => {
                debug!("Created pod {} for workload {}", spec.unit_id, spec.workload_id);
                self.handle_from_pod(&created)
                    .ok_or_else(|| ExecutorError::Unavailable {
                        reason: format!("pod {} returned without metadata", spec.unit_id),
                    })
            }
            Err(err) if is_status(&err, 409) => {
                // Same name means same workload unless the annotation disagrees
                let existing = self
                    .pods
                    .get(&spec.unit_id)
                    .await
                    .map_err(|e| with_unit(e, &spec.unit_id))?;
                match self.handle_from_pod(&existing) {
                    Some(handle) if handle.workload_id == spec.workload_id => {
                        debug!("Pod {} already exists, reusing", spec.unit_id);
                        Ok(handle)
                    }
                    _ => Err(ExecutorError::Rejected {
                        unit_id: spec.unit_id.clone(),
                        status: 409,
                        reason: "pod name taken by another workload".to_string(),
                    }),
                }
            }
            Err(err) => Err(with_unit(err, &spec.unit_id)),
        }
    }

    async fn find_by_mutex_key(&self, key: &MutexKey) -> ExecutorResult<Vec<UnitHandle>> {
        let selector = format!("{}={}", LABEL_MUTEX_KEY, label_value(key.as_str()));
        let pods = self.pods.list(&ListParams::default().labels(&selector)).await?;

        Ok(pods
            .items
            .iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .filter_map(|pod| self.handle_from_pod(pod))
            .collect())
    }

    async fn delete(&self, handle: &UnitHandle) -> ExecutorResult<()> {
        match self
            .pods
            .delete(&handle.unit_id, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deleted pod {} (workload {})", handle, handle.workload_id);
                Ok(())
            }
            Err(err) if is_status(&err, 404) => {
                warn!("Pod {} already gone", handle);
                Ok(())
            }
            Err(err) => Err(with_unit(err, &handle.unit_id)),
        }
    }

    async fn count_active(&self) -> ExecutorResult<usize> {
        let selector = format!("{}={}", LABEL_DATAPLANE, label_value(self.identity.as_str()));
        let params = ListParams::default()
            .labels(&selector)
            .fields("status.phase!=Succeeded,status.phase!=Failed");
        let pods = self.pods.list(&params).await?;
        Ok(pods.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_label_values_pass_through() {
        assert_eq!(label_value("conn-123"), "conn-123");
        assert_eq!(label_value("a.b_c"), "a.b_c");
    }

    #[test]
    fn test_invalid_label_values_are_hashed() {
        let value = label_value("connection/with spaces");
        assert!(is_valid_label_value(&value));
        assert!(value.starts_with("connection_with_spaces-"));
        assert_eq!(value, label_value("connection/with spaces"));
        assert_ne!(value, label_value("connection/with_spaces"));

        let long = label_value(&"k".repeat(100));
        assert!(long.len() <= MAX_LABEL_VALUE_LEN);
        assert!(is_valid_label_value(&long));

        let symbols = label_value("///");
        assert!(is_valid_label_value(&symbols));
        assert_eq!(symbols.len(), 16);
    }
}

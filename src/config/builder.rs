use super::{
    ConfigError, ConfigResult, LauncherConfig, MetricsConfig, MutexPolicy, RetryConfig,
};
use crate::core::executor::Architecture;

/// Builder for LauncherConfig that wraps the config itself
#[derive(Debug, Clone, Default)]
pub struct LauncherConfigBuilder {
    config: LauncherConfig,
    // Raw strings parsed during build so errors surface as ConfigError
    architecture_default: Option<String>,
    mutex_policy: Option<String>,
}

impl LauncherConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership
    pub fn from_config(config: LauncherConfig) -> Self {
        Self {
            config,
            architecture_default: None,
            mutex_policy: None,
        }
    }

    // ==================== Identity ====================

    pub fn dataplane_id(mut self, id: impl Into<String>) -> Self {
        self.config.dataplane_id = id.into();
        self
    }

    // ==================== Queue ====================

    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue.queue_size = size;
        self
    }

    pub fn max_concurrent_launches(mut self, max: usize) -> Self {
        self.config.queue.max_concurrent_launches = max;
        self
    }

    // ==================== Load Shedding ====================

    pub fn load_shed_enabled(mut self, enabled: bool) -> Self {
        self.config.load_shed.enabled = enabled;
        self
    }

    pub fn max_inflight_launches(mut self, max: usize) -> Self {
        self.config.load_shed.max_inflight_launches = max;
        self
    }

    pub fn max_cluster_units(mut self, max: usize) -> Self {
        self.config.load_shed.max_cluster_units = max;
        self
    }

    pub fn pressure_sample_interval_secs(mut self, secs: u64) -> Self {
        self.config.load_shed.sample_interval_secs = secs;
        self
    }

    // ==================== Mutex ====================

    pub fn mutex_label_keys(mut self, keys: Vec<String>) -> Self {
        self.config.mutex.label_keys = keys;
        self
    }

    pub fn mutex_policy(mut self, policy: MutexPolicy) -> Self {
        self.config.mutex.policy = policy;
        self.mutex_policy = None;
        self
    }

    /// Parsed during build
    pub fn mutex_policy_str(mut self, policy: impl Into<String>) -> Self {
        self.mutex_policy = Some(policy.into());
        self
    }

    // ==================== Architecture ====================

    pub fn architecture_label_key(mut self, key: impl Into<String>) -> Self {
        self.config.architecture.label_key = key.into();
        self
    }

    pub fn default_architecture(mut self, arch: Architecture) -> Self {
        self.config.architecture.default = arch;
        self.architecture_default = None;
        self
    }

    /// Parsed during build
    pub fn default_architecture_str(mut self, arch: impl Into<String>) -> Self {
        self.architecture_default = Some(arch.into());
        self
    }

    // ==================== Timeouts & Retry ====================

    pub fn registry_timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeouts.registry_timeout_secs = secs;
        self
    }

    pub fn executor_timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeouts.executor_timeout_secs = secs;
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn max_report_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    // ==================== Collaborators ====================

    pub fn registry_url(mut self, url: impl Into<String>) -> Self {
        self.config.registry.url = url.into();
        self
    }

    pub fn registry_api_key(mut self, key: Option<String>) -> Self {
        self.config.registry.api_key = key;
        self
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.config.kubernetes.namespace = namespace;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.kubernetes.image = image.into();
        self
    }

    pub fn image_pull_policy(mut self, policy: Option<String>) -> Self {
        self.config.kubernetes.image_pull_policy = policy;
        self
    }

    pub fn service_account(mut self, account: Option<String>) -> Self {
        self.config.kubernetes.service_account = account;
        self
    }

    // ==================== Poller ====================

    pub fn poller_enabled(mut self, enabled: bool) -> Self {
        self.config.poller.enabled = enabled;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poller.interval_secs = secs;
        self
    }

    pub fn resubmit_after_secs(mut self, secs: u64) -> Self {
        self.config.poller.resubmit_after_secs = secs;
        self
    }

    // ==================== Observability ====================

    pub fn metrics(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.metrics = Some(MetricsConfig {
            host: host.into(),
            port,
        });
        self
    }

    pub fn log_dir(mut self, dir: Option<String>) -> Self {
        self.config.log_dir = dir;
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn log_json(mut self, json: bool) -> Self {
        self.config.log_json = json;
        self
    }

    // ==================== Lifecycle ====================

    pub fn shutdown_grace_period_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_period_secs = secs;
        self
    }

    pub fn rehydrate_on_startup(mut self, enabled: bool) -> Self {
        self.config.rehydrate_on_startup = enabled;
        self
    }

    // ==================== Build ====================

    pub fn build(self) -> ConfigResult<LauncherConfig> {
        self.build_with_validation(true)
    }

    pub fn build_unchecked(self) -> LauncherConfig {
        self.config
    }

    pub fn build_with_validation(mut self, validate: bool) -> ConfigResult<LauncherConfig> {
        if let Some(raw) = self.mutex_policy.take() {
            self.config.mutex.policy =
                raw.parse::<MutexPolicy>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        field: "mutex.policy".to_string(),
                        value: raw.clone(),
                        reason,
                    })?;
        }

        if let Some(raw) = self.architecture_default.take() {
            self.config.architecture.default =
                raw.parse::<Architecture>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        field: "architecture.default".to_string(),
                        value: raw.clone(),
                        reason,
                    })?;
        }

        let config = self.config;
        if validate {
            config.validate()?;
        }
        Ok(config)
    }
}

impl From<LauncherConfigBuilder> for LauncherConfig {
    fn from(builder: LauncherConfigBuilder) -> Self {
        builder.build_unchecked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_nested_fields() {
        let config = LauncherConfigBuilder::new()
            .dataplane_id("dp-a")
            .max_concurrent_launches(4)
            .mutex_label_keys(vec!["connection_id".to_string(), "job_id".to_string()])
            .mutex_policy_str("reject_new")
            .default_architecture_str("aarch64")
            .image("launcher/workload:1.0")
            .metrics("127.0.0.1", 9100)
            .build()
            .unwrap();

        assert_eq!(config.dataplane_id, "dp-a");
        assert_eq!(config.queue.max_concurrent_launches, 4);
        assert_eq!(config.mutex.label_keys.len(), 2);
        assert_eq!(config.mutex.policy, MutexPolicy::RejectNew);
        assert_eq!(config.architecture.default, Architecture::Arm64);
        assert_eq!(config.kubernetes.image, "launcher/workload:1.0");
        assert_eq!(config.metrics.unwrap().port, 9100);
    }

    #[test]
    fn test_builder_rejects_unknown_policy() {
        let result = LauncherConfigBuilder::new()
            .dataplane_id("dp-a")
            .mutex_policy_str("coin_flip")
            .build();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field, .. }) if field == "mutex.policy"
        ));
    }

    #[test]
    fn test_build_validates_by_default() {
        assert!(LauncherConfigBuilder::new().build().is_err());
        assert!(LauncherConfigBuilder::new().build_with_validation(false).is_ok());
    }
}

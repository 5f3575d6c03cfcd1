use super::*;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &LauncherConfig) -> ConfigResult<()> {
        if config.dataplane_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "dataplane_id".to_string(),
            });
        }

        Self::validate_queue(&config.queue)?;
        Self::validate_load_shed(&config.load_shed)?;
        Self::validate_mutex(&config.mutex)?;
        Self::validate_architecture(&config.architecture)?;
        Self::validate_timeouts(&config.timeouts)?;
        Self::validate_retry(&config.retry)?;
        Self::validate_registry(&config.registry)?;

        if config.poller.enabled && config.poller.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poller.interval_secs".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }

        if let Some(metrics) = &config.metrics {
            if metrics.port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "metrics.port".to_string(),
                    value: "0".to_string(),
                    reason: "Must be > 0".to_string(),
                });
            }
        }

        Ok(())
    }

    fn validate_queue(queue: &QueueConfig) -> ConfigResult<()> {
        if queue.queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.queue_size".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        if queue.max_concurrent_launches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.max_concurrent_launches".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_load_shed(load_shed: &LoadShedConfig) -> ConfigResult<()> {
        if !load_shed.enabled {
            return Ok(());
        }
        if load_shed.max_inflight_launches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "load_shed.max_inflight_launches".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0 when load shedding is enabled".to_string(),
            });
        }
        if load_shed.max_cluster_units == 0 {
            return Err(ConfigError::InvalidValue {
                field: "load_shed.max_cluster_units".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0 when load shedding is enabled".to_string(),
            });
        }
        if load_shed.sample_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "load_shed.sample_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_mutex(mutex: &MutexConfig) -> ConfigResult<()> {
        if let Some(blank) = mutex.label_keys.iter().position(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("mutex.label_keys[{}]", blank),
                value: String::new(),
                reason: "Label keys must not be blank".to_string(),
            });
        }
        Ok(())
    }

    fn validate_architecture(architecture: &ArchitectureConfig) -> ConfigResult<()> {
        if architecture.label_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "architecture.label_key".to_string(),
            });
        }
        Ok(())
    }

    fn validate_timeouts(timeouts: &TimeoutConfig) -> ConfigResult<()> {
        if timeouts.registry_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.registry_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        if timeouts.executor_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.executor_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_retry(retry: &RetryConfig) -> ConfigResult<()> {
        if retry.max_retries < 1 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_retries".to_string(),
                value: retry.max_retries.to_string(),
                reason: "Must be >= 1".to_string(),
            });
        }
        if retry.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_backoff_ms".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_backoff_ms".to_string(),
                value: retry.max_backoff_ms.to_string(),
                reason: "Must be >= initial_backoff_ms".to_string(),
            });
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_multiplier".to_string(),
                value: retry.backoff_multiplier.to_string(),
                reason: "Must be >= 1.0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "retry.jitter_factor".to_string(),
                value: retry.jitter_factor.to_string(),
                reason: "Must be between 0.0 and 1.0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_registry(registry: &RegistryConfig) -> ConfigResult<()> {
        if registry.url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "registry.url".to_string(),
            });
        }
        if !(registry.url.starts_with("http://") || registry.url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "registry.url".to_string(),
                value: registry.url.clone(),
                reason: "URL must start with http:// or https://".to_string(),
            });
        }
        Ok(())
    }
}

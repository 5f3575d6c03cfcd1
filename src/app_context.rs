use std::sync::Arc;

use tracing::debug;

use crate::{
    config::LauncherConfig,
    core::{
        executor::{ClusterExecutor, KubernetesExecutor},
        load::{ClusterPressure, InflightTracker},
        mutex::KeyedLockTable,
        registry::{HttpWorkloadRegistry, WorkloadRegistry},
    },
    pipeline::{
        stage::Stage, CheckStatusStage, ClaimStage, EnforceMutexStage, LaunchPipeline,
        LaunchPodStage, LaunchQueue, LaunchSubmitter, LoadShedStage, PendingWorkloadPoller,
        ReportingFailureHandler, ReportingSuccessHandler, SelectArchitectureStage,
        StartupRehydrator,
    },
    protocols::DataplaneIdentity,
};

/// Error type for LauncherContext builder
#[derive(Debug)]
pub struct LauncherContextBuildError(&'static str);

impl std::fmt::Display for LauncherContextBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Missing required field: {}", self.0)
    }
}

impl std::error::Error for LauncherContextBuildError {}

/// Composition root: the collaborators and shared state every pipeline
/// component is wired from.
pub struct LauncherContext {
    pub config: LauncherConfig,
    pub identity: DataplaneIdentity,
    pub registry: Arc<dyn WorkloadRegistry>,
    pub executor: Arc<dyn ClusterExecutor>,
    pub locks: Arc<KeyedLockTable>,
    pub inflight: Arc<InflightTracker>,
    pub pressure: Arc<ClusterPressure>,
}

impl std::fmt::Debug for LauncherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherContext")
            .field("identity", &self.identity)
            .field("registry", &self.registry.name())
            .field("executor", &self.executor.name())
            .finish()
    }
}

pub struct LauncherContextBuilder {
    config: Option<LauncherConfig>,
    registry: Option<Arc<dyn WorkloadRegistry>>,
    executor: Option<Arc<dyn ClusterExecutor>>,
    locks: Option<Arc<KeyedLockTable>>,
    inflight: Option<Arc<InflightTracker>>,
    pressure: Option<Arc<ClusterPressure>>,
}

impl LauncherContext {
    pub fn builder() -> LauncherContextBuilder {
        LauncherContextBuilder::new()
    }

    /// Connect to the HTTP registry and the Kubernetes API described by `config`.
    pub async fn from_config(config: LauncherConfig) -> Result<Self, String> {
        LauncherContextBuilder::from_config(config)
            .await?
            .build()
            .map_err(|e| e.to_string())
    }

    /// Stages in launch order.
    pub fn stages(&self) -> Vec<Box<dyn Stage>> {
        let registry_timeout = self.config.timeouts.registry();
        let executor_timeout = self.config.timeouts.executor();

        vec![
            Box::new(ClaimStage::new(
                Arc::clone(&self.registry),
                self.identity.clone(),
                registry_timeout,
            )),
            Box::new(LoadShedStage::new(
                Arc::clone(&self.inflight),
                Arc::clone(&self.pressure),
                self.config.load_shed.clone(),
            )),
            Box::new(CheckStatusStage::new(
                Arc::clone(&self.registry),
                registry_timeout,
            )),
            Box::new(EnforceMutexStage::new(
                Arc::clone(&self.executor),
                Arc::clone(&self.locks),
                self.config.mutex.clone(),
                executor_timeout,
            )),
            Box::new(SelectArchitectureStage::new(
                self.config.architecture.clone(),
            )),
            Box::new(LaunchPodStage::new(
                Arc::clone(&self.executor),
                executor_timeout,
            )),
        ]
    }

    pub fn pipeline(&self) -> LaunchPipeline {
        LaunchPipeline::new(self.stages())
    }

    /// Start the launch queue with the default pipeline and reporting handlers.
    pub fn start_queue(&self) -> Arc<LaunchQueue> {
        self.start_queue_with(self.pipeline())
    }

    pub fn start_queue_with(&self, pipeline: LaunchPipeline) -> Arc<LaunchQueue> {
        let registry_timeout = self.config.timeouts.registry();
        LaunchQueue::new(
            &self.config.queue,
            pipeline,
            Arc::clone(&self.inflight),
            Arc::new(ReportingSuccessHandler::new(
                Arc::clone(&self.registry),
                self.config.retry.clone(),
                registry_timeout,
            )),
            Arc::new(ReportingFailureHandler::new(
                Arc::clone(&self.registry),
                self.config.retry.clone(),
                registry_timeout,
            )),
        )
    }

    pub fn rehydrator(&self, submitter: Arc<dyn LaunchSubmitter>) -> StartupRehydrator {
        StartupRehydrator::new(
            Arc::clone(&self.registry),
            submitter,
            self.identity.clone(),
            self.config.retry.clone(),
            self.config.timeouts.registry(),
        )
    }

    pub fn poller(&self, submitter: Arc<dyn LaunchSubmitter>) -> PendingWorkloadPoller {
        PendingWorkloadPoller::new(
            Arc::clone(&self.registry),
            submitter,
            self.config.poller.clone(),
            self.config.timeouts.registry(),
        )
    }
}

impl LauncherContextBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            registry: None,
            executor: None,
            locks: None,
            inflight: None,
            pressure: None,
        }
    }

    pub fn config(mut self, config: LauncherConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn WorkloadRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ClusterExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn locks(mut self, locks: Arc<KeyedLockTable>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn inflight(mut self, inflight: Arc<InflightTracker>) -> Self {
        self.inflight = Some(inflight);
        self
    }

    pub fn pressure(mut self, pressure: Arc<ClusterPressure>) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Lock table, in-flight counter and pressure gauge default to fresh
    /// instances; config, registry and executor are required.
    pub fn build(self) -> Result<LauncherContext, LauncherContextBuildError> {
        let config = self.config.ok_or(LauncherContextBuildError("config"))?;
        let identity = config.dataplane_identity();

        Ok(LauncherContext {
            identity,
            registry: self.registry.ok_or(LauncherContextBuildError("registry"))?,
            executor: self.executor.ok_or(LauncherContextBuildError("executor"))?,
            locks: self.locks.unwrap_or_default(),
            inflight: self.inflight.unwrap_or_else(InflightTracker::new),
            pressure: self.pressure.unwrap_or_else(ClusterPressure::new),
            config,
        })
    }

    pub async fn from_config(config: LauncherConfig) -> Result<Self, String> {
        Ok(Self::new()
            .with_http_registry(&config)?
            .with_kubernetes_executor(&config)
            .await?
            .config(config))
    }

    fn with_http_registry(self, config: &LauncherConfig) -> Result<Self, String> {
        let registry = HttpWorkloadRegistry::new(&config.registry, config.timeouts.registry())
            .map_err(|e| format!("Failed to create registry client: {}", e))?;
        debug!("Workload registry client created for {}", config.registry.url);
        Ok(self.registry(Arc::new(registry)))
    }

    async fn with_kubernetes_executor(self, config: &LauncherConfig) -> Result<Self, String> {
        let executor =
            KubernetesExecutor::connect(config.kubernetes.clone(), config.dataplane_identity())
                .await
                .map_err(|e| format!("Failed to connect to Kubernetes: {}", e))?;
        Ok(self.executor(Arc::new(executor)))
    }
}

impl Default for LauncherContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LauncherConfigBuilder,
        core::{executor::InMemoryClusterExecutor, registry::InMemoryWorkloadRegistry},
        pipeline::StageName,
    };

    #[test]
    fn test_missing_field_is_named() {
        let err = LauncherContext::builder()
            .config(LauncherConfig::default())
            .executor(Arc::new(InMemoryClusterExecutor::new()))
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: registry");
    }

    #[test]
    fn test_default_stage_order() {
        let config = LauncherConfigBuilder::new()
            .dataplane_id("dp-a")
            .build()
            .unwrap();
        let context = LauncherContext::builder()
            .config(config)
            .registry(Arc::new(InMemoryWorkloadRegistry::new()))
            .executor(Arc::new(InMemoryClusterExecutor::new()))
            .build()
            .unwrap();

        assert_eq!(context.identity.as_str(), "dp-a");
        assert_eq!(
            context.pipeline().stage_names(),
            vec![
                StageName::Claim,
                StageName::LoadShed,
                StageName::CheckStatus,
                StageName::EnforceMutex,
                StageName::SelectArchitecture,
                StageName::LaunchPod,
            ]
        );
    }
}

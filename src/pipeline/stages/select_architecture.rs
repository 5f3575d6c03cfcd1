use async_trait::async_trait;

use crate::{
    config::ArchitectureConfig,
    core::executor::Architecture,
    pipeline::{
        item::PipelineItem,
        stage::{Stage, StageError, StageName, StageResult},
    },
};

/// Pure stage: resolve the target architecture from the request labels.
pub struct SelectArchitectureStage {
    config: ArchitectureConfig,
}

impl SelectArchitectureStage {
    pub fn new(config: ArchitectureConfig) -> Self {
        Self { config }
    }

    pub fn select(&self, item: &PipelineItem) -> StageResult<Architecture> {
        match item.request().labels.get(&self.config.label_key) {
            None => Ok(self.config.default),
            Some(value) if value.trim().is_empty() => Ok(self.config.default),
            Some(value) => value
                .parse::<Architecture>()
                .map_err(|reason| StageError::non_retryable(self.name(), reason)),
        }
    }
}

#[async_trait]
impl Stage for SelectArchitectureStage {
    async fn apply(&self, item: &mut PipelineItem) -> StageResult<()> {
        let architecture = self.select(item)?;
        item.architecture = Some(architecture);
        Ok(())
    }

    fn name(&self) -> StageName {
        StageName::SelectArchitecture
    }
}

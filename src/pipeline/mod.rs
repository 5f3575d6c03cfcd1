//! Launch pipeline
//!
//! A launch request enters through the [`LaunchQueue`], becomes a
//! [`PipelineItem`] and runs through the ordered stages of the
//! [`LaunchPipeline`]. The outcome goes to exactly one of the success or
//! failure handlers, which are the only components that report status back
//! to the registry.

pub mod engine;
pub mod handlers;
pub mod item;
pub mod poller;
pub mod queue;
pub mod rehydrator;
pub mod stage;
pub mod stages;

pub use engine::LaunchPipeline;
pub use handlers::{FailureHandler, ReportingFailureHandler, ReportingSuccessHandler, SuccessHandler};
pub use item::{PipelineItem, SkipReason};
pub use poller::PendingWorkloadPoller;
pub use queue::{LaunchQueue, LaunchQueueError, LaunchSubmitter};
pub use rehydrator::StartupRehydrator;
pub use stage::{
    PipelineOutcome, Stage, StageError, StageErrorKind, StageFailure, StageName, StageOutcome,
    StageResult,
};
pub use stages::{
    CheckStatusStage, ClaimStage, EnforceMutexStage, LaunchPodStage, LoadShedStage,
    SelectArchitectureStage,
};

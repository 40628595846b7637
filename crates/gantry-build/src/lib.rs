//! Gantry build scheduling
//!
//! Turns a build closure into per-package jobs, dispatches them onto an
//! execution backend in dependency order with bounded concurrency, and
//! produces the per-package report. Also hosts the publish pipeline and the
//! registry/version-control collaborator boundaries.

pub mod job;
pub mod publish;
pub mod report;
pub mod scheduler;

pub use job::{JobState, StepKind};
pub use publish::{FailingVcs, MemoryRegistry, PublishPipeline, RecordingVcs, Registry, Vcs};
pub use report::{BuildReport, FailureCause, JobOutcome, JobReport, PublishOutcome, SkipReason};
pub use scheduler::{Scheduler, SchedulerConfig};

/// Build orchestration errors
///
/// Job-level failures are not errors; they are outcomes in the
/// [`BuildReport`]. These variants cover the machinery around the jobs.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("Closure references unknown package: {0}")]
    PackageNotFound(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Version control error: {0}")]
    Vcs(String),
}

pub type Result<T> = std::result::Result<T, BuildError>;

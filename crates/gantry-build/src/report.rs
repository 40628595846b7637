//! Per-invocation build report

use crate::job::StepKind;
use chrono::{DateTime, Utc};
use gantry_graph::ClosureReason;
use std::time::Duration;

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// A step's script exited non-zero
    StepFailed {
        step: StepKind,
        exit_code: i32,
        output: String,
    },
    /// A step exceeded its timeout
    Timeout { step: StepKind, limit: Duration },
    /// Infrastructure gave out (agent unavailable, transport, spawn)
    Infrastructure { step: StepKind, error: String },
}

impl FailureCause {
    /// The step the failure occurred in
    pub fn step(&self) -> StepKind {
        match self {
            Self::StepFailed { step, .. }
            | Self::Timeout { step, .. }
            | Self::Infrastructure { step, .. } => *step,
        }
    }

    /// One-line description for the report
    pub fn describe(&self) -> String {
        match self {
            Self::StepFailed {
                step, exit_code, ..
            } => format!("{step} step exited with code {exit_code}"),
            Self::Timeout { step, limit } => {
                format!("{step} step timed out after {limit:?}")
            }
            Self::Infrastructure { step, error } => format!("{step} step: {error}"),
        }
    }
}

/// Why a job never ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A direct dependency failed or was itself skipped
    DependencyFailed(String),
    /// The invocation was cancelled before the job started
    Cancelled,
}

impl SkipReason {
    pub fn describe(&self) -> String {
        match self {
            Self::DependencyFailed(dep) => format!("dependency '{dep}' did not succeed"),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Terminal outcome of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(FailureCause),
    Skipped(SkipReason),
    /// Dry-run stand-in for a job that would have executed
    WouldBuild,
}

impl JobOutcome {
    /// Whether this outcome counts as success for the invocation
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::WouldBuild)
    }
}

/// Outcome of the publish pipeline for a succeeded job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { version: semver::Version },
    Skipped { reason: String },
    Failed { error: String },
}

impl PublishOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One package's line in the report
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub package: String,
    /// Why the package was part of the closure
    pub reason: ClosureReason,
    pub outcome: JobOutcome,
    /// Wall-clock execution time; zero for jobs that never ran
    pub duration: Duration,
    /// Present when the publish pipeline ran for this job
    pub publish: Option<PublishOutcome>,
}

/// The full per-invocation report, produced even under partial failure
#[derive(Debug, Clone)]
pub struct BuildReport {
    jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    pub fn new(jobs: Vec<JobReport>, started_at: DateTime<Utc>) -> Self {
        Self {
            jobs,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Job reports in dispatch order
    pub fn jobs(&self) -> &[JobReport] {
        &self.jobs
    }

    /// Look up one package's report
    pub fn job(&self, package: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.package == package)
    }

    /// Whether every job succeeded (publish outcomes not considered)
    pub fn success(&self) -> bool {
        self.jobs.iter().all(|j| j.outcome.is_success())
    }

    /// Whether every job succeeded and no publish attempt failed
    pub fn success_including_publish(&self) -> bool {
        self.success()
            && self
                .jobs
                .iter()
                .filter_map(|j| j.publish.as_ref())
                .all(|p| !p.is_failure())
    }

    /// Counts of (succeeded, failed, skipped) jobs
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for job in &self.jobs {
            match &job.outcome {
                JobOutcome::Succeeded | JobOutcome::WouldBuild => succeeded += 1,
                JobOutcome::Failed(_) => failed += 1,
                JobOutcome::Skipped(_) => skipped += 1,
            }
        }
        (succeeded, failed, skipped)
    }
}

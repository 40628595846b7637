//! Build job states and the per-package step sequence

use std::fmt;

/// Lifecycle of one package's build job
///
/// Pending -> Ready (all in-closure dependencies Succeeded) -> Running ->
/// Succeeded | Failed. A job whose dependency Failed or was Skipped goes
/// straight to Skipped without executing. States are owned and mutated only
/// by the scheduler's decision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    /// Whether the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// The ordered steps of one package execution
///
/// The first failing step marks the job Failed and aborts the remaining
/// steps of that package only. Publish is not part of the build sequence;
/// it runs through the publish pipeline after a job succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Install,
    Build,
    Test,
    Publish,
}

impl StepKind {
    /// The manifest script name for this step
    pub fn script_name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Build => "build",
            Self::Test => "test",
            Self::Publish => "publish",
        }
    }

    /// Build-phase steps in execution order
    pub fn build_sequence() -> [StepKind; 3] {
        [Self::Install, Self::Build, Self::Test]
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.script_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Ready.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Skipped.is_terminal());
    }

    #[test]
    fn test_build_sequence_order() {
        let steps = StepKind::build_sequence();
        assert_eq!(steps[0], StepKind::Install);
        assert_eq!(steps[1], StepKind::Build);
        assert_eq!(steps[2], StepKind::Test);
    }

    #[test]
    fn test_script_names() {
        assert_eq!(StepKind::Install.script_name(), "install");
        assert_eq!(StepKind::Publish.to_string(), "publish");
    }
}

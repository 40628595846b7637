//! Gantry execution backends
//!
//! A build step is described once as a [`LogicalCommand`] and runs
//! unmodified on either backend: [`LocalBackend`] executes it directly in
//! the package directory, [`AgentBackend`] transforms it for an acquired
//! agent instance first (working-directory remapping, credential
//! injection, one-shot auth files). Credentials are carried as marked
//! environment entries and never appear in logs or in the package tree.

pub mod agent;
pub mod backend;
pub mod command;
pub mod transform;

pub use agent::{AcquireCriteria, AgentBackend, AgentBackendConfig, AgentInstance, AgentPool, HostAgentPool};
pub use backend::{ExecutionBackend, LocalBackend};
pub use command::{CancelToken, CommandOutput, EnvVar, LogicalCommand};
pub use transform::{AgentSetup, AuthFile, CommandTransformer, ConcreteCommand};

use std::path::PathBuf;
use std::time::Duration;

/// Execution backend errors
///
/// A script exiting non-zero is not an error here; it is a normal
/// [`CommandOutput`] the caller turns into a failed job. These variants
/// cover infrastructure: spawning, timeouts, cancellation, and the agent
/// protocol.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to spawn command: {0}")]
    Spawn(std::io::Error),

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Step timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("No agent instance available after {attempts} attempts: {cause}")]
    AgentUnavailable { attempts: usize, cause: String },

    #[error("Agent transport failure: {0}")]
    AgentTransport(String),

    #[error("Execution backend already closed")]
    Closed,
}

impl ExecError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;

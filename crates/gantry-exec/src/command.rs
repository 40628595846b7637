//! Backend-agnostic command description

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One environment entry of a command
///
/// Entries marked secret hold credentials. Their values reach only the
/// spawned child's environment; `Debug` and `Display` render them masked.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    value: String,
    secret: bool,
}

impl EnvVar {
    /// Plain environment entry
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }

    /// Credential-bearing entry; masked everywhere except the child process
    pub fn secret(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: true,
        }
    }

    /// The raw value, for handing to the child process environment only
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }
}

impl fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvVar")
            .field("key", &self.key)
            .field("value", if self.secret { &"***" } else { &self.value })
            .field("secret", &self.secret)
            .finish()
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            write!(f, "{}=***", self.key)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

/// A backend-agnostic command: shell script, working directory, environment
///
/// The same logical command executes unmodified on the local shell or on a
/// remote agent; the agent path transforms it first.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalCommand {
    /// Shell command string, run via `sh -c`
    pub script: String,
    /// Working directory (the package directory for build steps)
    pub cwd: PathBuf,
    /// Environment entries, credentials included
    pub env: Vec<EnvVar>,
}

impl LogicalCommand {
    /// Create a command from a shell script and working directory
    pub fn shell(script: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Add a plain environment entry
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(key, value));
        self
    }

    /// Add a credential-bearing environment entry
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::secret(key, value));
        self
    }
}

/// Captured result of an executed command
///
/// A non-zero exit code is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output for failure reporting
    pub fn combined(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(self.stdout.trim_end());
        }
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stderr.trim_end());
        }
        out
    }
}

/// Cooperative cancellation flag shared between the scheduler and backends
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; in-flight processes are killed at the next poll
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_masked_in_debug_and_display() {
        let var = EnvVar::secret("REGISTRY_TOKEN", "hunter2");
        assert!(!format!("{var:?}").contains("hunter2"));
        assert_eq!(var.to_string(), "REGISTRY_TOKEN=***");
        assert_eq!(var.value(), "hunter2");
    }

    #[test]
    fn test_plain_env_var_displayed() {
        let var = EnvVar::new("CI", "true");
        assert_eq!(var.to_string(), "CI=true");
        assert!(format!("{var:?}").contains("true"));
    }

    #[test]
    fn test_logical_command_builder() {
        let command = LogicalCommand::shell("npm test", "/ws/a")
            .with_env("CI", "true")
            .with_secret("TOKEN", "s3cr3t");

        assert_eq!(command.script, "npm test");
        assert_eq!(command.env.len(), 2);
        assert!(command.env[1].is_secret());
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            exit_code: 0,
            stdout: "done\n".into(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert_eq!(ok.combined(), "done");

        let failed = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom\n".into(),
        };
        assert!(!failed.success());
        assert_eq!(failed.combined(), "boom");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}

//! Execution backend trait and the local shell implementation

use crate::command::{CancelToken, CommandOutput, EnvVar, LogicalCommand};
use crate::{ExecError, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often an in-flight child process is polled for exit, timeout, and
/// cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Capability to run a logical command somewhere
///
/// Implementations capture the target (local shell, acquired agent
/// instance) at construction time; the scheduler stays backend-agnostic.
pub trait ExecutionBackend: Send + Sync {
    /// Execute the command and capture its result.
    ///
    /// Non-zero exit codes come back as `Ok` outputs; `Err` is reserved for
    /// infrastructure failures (spawn, timeout, cancellation, agent
    /// protocol).
    fn execute(&self, command: &LogicalCommand) -> Result<CommandOutput>;

    /// Release any resources held by the backend. Idempotent; the default
    /// implementation holds nothing.
    fn close(&self) {}
}

/// Local shell execution: `sh -c <script>` in the command's directory
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a per-command timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a cancellation token; cancelled commands are killed
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl ExecutionBackend for LocalBackend {
    fn execute(&self, command: &LogicalCommand) -> Result<CommandOutput> {
        run_shell(
            &command.script,
            &command.cwd,
            &command.env,
            self.timeout,
            &self.cancel,
        )
    }
}

/// Spawn `sh -c <script>`, polling for exit, timeout, and cancellation.
///
/// Output is drained on separate threads so a full pipe can never wedge the
/// poll loop. On timeout or cancellation the child is killed and reaped.
pub(crate) fn run_shell(
    script: &str,
    cwd: &Path,
    env: &[EnvVar],
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .current_dir(cwd)
        .envs(env.iter().map(|var| (var.key.clone(), var.value().to_string())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ExecError::Spawn)?;

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        match child.try_wait().map_err(ExecError::Spawn)? {
            Some(status) => break status,
            None => {
                if cancel.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecError::Cancelled);
                }
                if let Some(limit) = timeout {
                    if started.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ExecError::Timeout { limit });
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut source) = source {
            let _ = source.read_to_string(&mut buf);
        }
        buf
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn test_execute_captures_stdout() {
        let backend = LocalBackend::new();
        let output = backend
            .execute(&LogicalCommand::shell("echo hello", cwd()))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_is_ok_output() {
        let backend = LocalBackend::new();
        let output = backend
            .execute(&LogicalCommand::shell("echo nope >&2; exit 3", cwd()))
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "nope");
    }

    #[test]
    fn test_env_injection() {
        let backend = LocalBackend::new();
        let command = LogicalCommand::shell("printf '%s' \"$GREETING\"", cwd())
            .with_env("GREETING", "hi there");
        let output = backend.execute(&command).unwrap();
        assert_eq!(output.stdout, "hi there");
    }

    #[test]
    fn test_secret_env_reaches_child() {
        let backend = LocalBackend::new();
        let command =
            LogicalCommand::shell("printf '%s' \"$TOKEN\"", cwd()).with_secret("TOKEN", "t0ps3cret");
        let output = backend.execute(&command).unwrap();
        assert_eq!(output.stdout, "t0ps3cret");
    }

    #[test]
    fn test_timeout_kills_process() {
        let backend = LocalBackend::new().with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        let err = backend
            .execute(&LogicalCommand::shell("sleep 30", cwd()))
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_pre_cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let backend = LocalBackend::new().with_cancel(cancel);
        let err = backend
            .execute(&LogicalCommand::shell("echo never", cwd()))
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[test]
    fn test_cancellation_kills_in_flight_process() {
        let cancel = CancelToken::new();
        let backend = LocalBackend::new().with_cancel(cancel.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let started = Instant::now();
        let err = backend
            .execute(&LogicalCommand::shell("sleep 30", cwd()))
            .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, ExecError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_large_output_does_not_deadlock() {
        let backend = LocalBackend::new();
        // Well past the usual 64 KiB pipe buffer
        let output = backend
            .execute(&LogicalCommand::shell(
                "i=0; while [ $i -lt 20000 ]; do echo 'a line of filler output'; i=$((i+1)); done",
                cwd(),
            ))
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.lines().count() >= 20000);
    }
}

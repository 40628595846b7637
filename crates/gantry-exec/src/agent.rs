//! Agent pool boundary and the agent-backed execution backend
//!
//! The pool hands out instances (isolated execution targets with their own
//! scratch filesystem); the backend acquires one lazily, reuses it across
//! the jobs of an invocation, and guarantees a single release no matter how
//! the jobs end.

use crate::backend::{run_shell, ExecutionBackend};
use crate::command::{CancelToken, CommandOutput, LogicalCommand};
use crate::transform::{AgentSetup, CommandTransformer, ConcreteCommand};
use crate::{ExecError, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// An acquired execution target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInstance {
    /// Pool-unique identifier
    pub id: u64,
    /// Instance scratch root; auth files live here, never in a package tree
    pub root: PathBuf,
    /// Addressing descriptor (opaque to the scheduler)
    pub address: String,
}

/// What an acquisition asks of the pool
#[derive(Debug, Clone, Default)]
pub struct AcquireCriteria {
    /// Free-form label for diagnostics (the job batch acquiring it)
    pub label: String,
}

impl AcquireCriteria {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

/// Provisioning boundary: acquire and release instances.
///
/// Lifecycle of the underlying compute (containers, VMs) is entirely the
/// pool's concern; the backend only sees handles.
pub trait AgentPool: Send + Sync {
    fn acquire(&self, criteria: &AcquireCriteria) -> Result<AgentInstance>;
    fn release(&self, instance: AgentInstance) -> Result<()>;
}

/// A pool whose instances are scratch directories on the invoking machine.
///
/// This is the host-agent model: isolation comes from giving each instance
/// its own working area, not from a separate machine. Release removes the
/// scratch directory.
#[derive(Debug)]
pub struct HostAgentPool {
    base_dir: PathBuf,
    next_id: AtomicU64,
}

impl HostAgentPool {
    /// Create a pool rooted at the given directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a pool rooted in the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("gantry-agents"))
    }
}

impl AgentPool for HostAgentPool {
    fn acquire(&self, _criteria: &AcquireCriteria) -> Result<AgentInstance> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let root = self.base_dir.join(format!("agent-{id}"));
        fs::create_dir_all(&root).map_err(|e| ExecError::AgentUnavailable {
            attempts: 1,
            cause: format!("failed to create instance root {}: {e}", root.display()),
        })?;

        Ok(AgentInstance {
            id,
            root,
            address: "host".to_string(),
        })
    }

    fn release(&self, instance: AgentInstance) -> Result<()> {
        if instance.root.exists() {
            fs::remove_dir_all(&instance.root)
                .map_err(|e| ExecError::io(&instance.root, e))?;
        }
        Ok(())
    }
}

/// Configuration for the agent-backed execution backend
#[derive(Debug, Clone)]
pub struct AgentBackendConfig {
    /// Acquisition attempts before giving up with `AgentUnavailable`
    pub acquire_attempts: usize,
    /// Delay between acquisition attempts
    pub acquire_backoff: Duration,
    /// Per-command timeout
    pub timeout: Option<Duration>,
}

impl Default for AgentBackendConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: 3,
            acquire_backoff: Duration::from_millis(250),
            timeout: None,
        }
    }
}

enum InstanceSlot {
    Unacquired,
    Acquired(AgentInstance),
    Released,
}

/// Execution backend that runs commands on a pool-acquired instance.
///
/// The instance is acquired on first use and reused for every subsequent
/// command (one instance per invocation batch). `close` releases it exactly
/// once; dropping the backend closes it as a fallback.
pub struct AgentBackend {
    pool: Arc<dyn AgentPool>,
    setup: AgentSetup,
    transformer: CommandTransformer,
    config: AgentBackendConfig,
    cancel: CancelToken,
    slot: Mutex<InstanceSlot>,
}

impl AgentBackend {
    pub fn new(pool: Arc<dyn AgentPool>, setup: AgentSetup) -> Self {
        Self {
            pool,
            setup,
            transformer: CommandTransformer::new(),
            config: AgentBackendConfig::default(),
            cancel: CancelToken::new(),
            slot: Mutex::new(InstanceSlot::Unacquired),
        }
    }

    pub fn with_config(mut self, config: AgentBackendConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Acquire with bounded retries, converting exhaustion into a single
    /// `AgentUnavailable` carrying the last cause.
    fn acquire_with_retry(&self, criteria: &AcquireCriteria) -> Result<AgentInstance> {
        let attempts = self.config.acquire_attempts.max(1);
        let mut last_cause = String::new();

        for attempt in 1..=attempts {
            match self.pool.acquire(criteria) {
                Ok(instance) => return Ok(instance),
                Err(e) => {
                    last_cause = e.to_string();
                    if attempt < attempts {
                        thread::sleep(self.config.acquire_backoff);
                    }
                }
            }
        }

        Err(ExecError::AgentUnavailable {
            attempts,
            cause: last_cause,
        })
    }

    /// The instance for this batch, acquiring it on first use
    fn instance(&self) -> Result<AgentInstance> {
        let mut slot = self.slot.lock().expect("instance slot poisoned");
        match &*slot {
            InstanceSlot::Acquired(instance) => Ok(instance.clone()),
            InstanceSlot::Released => Err(ExecError::Closed),
            InstanceSlot::Unacquired => {
                let instance = self.acquire_with_retry(&AcquireCriteria::labeled("build batch"))?;
                *slot = InstanceSlot::Acquired(instance.clone());
                Ok(instance)
            }
        }
    }

    fn run_concrete(&self, concrete: &ConcreteCommand) -> Result<CommandOutput> {
        // Auth files exist only for the duration of this command; the guard
        // removes them on every exit path.
        let _guard = AuthFileGuard::write(&concrete.auth_files)?;

        let result = run_shell(
            &concrete.script,
            &concrete.cwd,
            &concrete.env,
            self.config.timeout,
            &self.cancel,
        );

        match result {
            // A failed spawn is a transport-level fault on the agent path;
            // retry once before giving up.
            Err(ExecError::Spawn(first)) => {
                match run_shell(
                    &concrete.script,
                    &concrete.cwd,
                    &concrete.env,
                    self.config.timeout,
                    &self.cancel,
                ) {
                    Ok(output) => Ok(output),
                    Err(ExecError::Spawn(second)) => Err(ExecError::AgentTransport(format!(
                        "command spawn failed twice: {first}; then: {second}"
                    ))),
                    Err(other) => Err(other),
                }
            }
            other => other,
        }
    }
}

impl ExecutionBackend for AgentBackend {
    fn execute(&self, command: &LogicalCommand) -> Result<CommandOutput> {
        let instance = self.instance()?;
        let concrete = self.transformer.transform(&instance, command, &self.setup);
        self.run_concrete(&concrete)
    }

    /// Release the instance back to the pool. Safe to call repeatedly; only
    /// the first call releases.
    fn close(&self) {
        let instance = {
            let mut slot = self.slot.lock().expect("instance slot poisoned");
            match std::mem::replace(&mut *slot, InstanceSlot::Released) {
                InstanceSlot::Acquired(instance) => Some(instance),
                InstanceSlot::Unacquired | InstanceSlot::Released => None,
            }
        };

        if let Some(instance) = instance {
            let _ = self.pool.release(instance);
        }
    }
}

impl Drop for AgentBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writes one-shot auth files and removes them on drop, success or failure
struct AuthFileGuard {
    paths: Vec<PathBuf>,
}

impl AuthFileGuard {
    fn write(files: &[(PathBuf, crate::transform::AuthFile)]) -> Result<Self> {
        let mut guard = Self { paths: Vec::new() };
        for (path, file) in files {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| ExecError::io(parent, e))?;
            }
            fs::write(path, file.contents()).map_err(|e| ExecError::io(path, e))?;
            guard.paths.push(path.clone());
        }
        Ok(guard)
    }
}

impl Drop for AuthFileGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}

/// Convenience for single-command callers: run one command on a freshly
/// acquired instance, releasing it before returning.
pub fn execute_once(
    pool: Arc<dyn AgentPool>,
    setup: AgentSetup,
    command: &LogicalCommand,
) -> Result<CommandOutput> {
    let backend = AgentBackend::new(pool, setup);
    let result = backend.execute(command);
    backend.close();
    result
}

//! Build scheduler
//!
//! A single-threaded decision loop owns every job's state; workers on a
//! bounded rayon pool execute the steps and report back over a channel.
//! Ready jobs dispatch in package-name order, so the same closure and
//! concurrency always produce the same dispatch sequence.

use crate::job::{JobState, StepKind};
use crate::publish::PublishPipeline;
use crate::report::{BuildReport, FailureCause, JobOutcome, JobReport, PublishOutcome, SkipReason};
use crate::{BuildError, Result};
use gantry_exec::{CancelToken, ExecError, ExecutionBackend, LogicalCommand};
use gantry_graph::{BuildClosure, PackageGraph};
use gantry_manifest::Package;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum jobs in flight at once
    pub concurrency: usize,
    /// Record what would build without executing anything
    pub dry_run: bool,
    /// Print per-step progress lines
    pub verbose: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            dry_run: false,
            verbose: false,
        }
    }
}

/// What a worker sends back to the decision loop when a job finishes
struct WorkerMessage {
    package: String,
    outcome: JobOutcome,
    publish: Option<PublishOutcome>,
    duration: Duration,
}

/// Orders and dispatches package build jobs over an execution backend
pub struct Scheduler {
    config: SchedulerConfig,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Share a cancellation token with backends and signal handlers
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every job in the closure, respecting the dependency partial
    /// order, and produce the report. Job failures are outcomes, not
    /// errors; `Err` here means the machinery itself could not run.
    pub fn run(
        &self,
        graph: &PackageGraph,
        closure: &BuildClosure,
        backend: Arc<dyn ExecutionBackend>,
        publisher: Option<Arc<PublishPipeline>>,
    ) -> Result<BuildReport> {
        let started_at = chrono::Utc::now();

        // Resolve closure entries to packages up front; a closure naming a
        // package the graph lacks is a caller bug, caught before any job.
        let mut packages: BTreeMap<String, Package> = BTreeMap::new();
        for name in closure.names() {
            let package = graph
                .package(name)
                .ok_or_else(|| BuildError::PackageNotFound(name.to_string()))?;
            packages.insert(name.to_string(), package.clone());
        }

        if self.config.dry_run {
            return Ok(self.dry_run_report(closure, started_at));
        }

        let in_closure: BTreeSet<&str> = packages.keys().map(String::as_str).collect();

        // In-closure dependency/dependent adjacency
        let mut deps_remaining: BTreeMap<String, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in packages.keys() {
            let deps: Vec<&String> = graph
                .dependencies_of(name)
                .iter()
                .filter(|d| in_closure.contains(d.as_str()))
                .collect();
            deps_remaining.insert(name.clone(), deps.len());
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        let mut states: BTreeMap<String, JobState> = packages
            .keys()
            .map(|name| (name.clone(), JobState::Pending))
            .collect();
        let mut ready: BTreeSet<String> = BTreeSet::new();
        for (name, remaining) in &deps_remaining {
            if *remaining == 0 {
                states.insert(name.clone(), JobState::Ready);
                ready.insert(name.clone());
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.max(1))
            .thread_name(|i| format!("gantry-worker-{i}"))
            .build()
            .map_err(|e| BuildError::ThreadPool(e.to_string()))?;
        let (tx, rx) = mpsc::channel::<WorkerMessage>();

        let mut results: BTreeMap<String, (JobOutcome, Duration, Option<PublishOutcome>)> =
            BTreeMap::new();
        let mut running = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                // Jobs not yet started are skipped; in-flight ones are
                // killed by the backend's cancel token and report back.
                for (name, state) in states.iter_mut() {
                    if matches!(state, JobState::Pending | JobState::Ready) {
                        *state = JobState::Skipped;
                        results.insert(
                            name.clone(),
                            (
                                JobOutcome::Skipped(SkipReason::Cancelled),
                                Duration::ZERO,
                                None,
                            ),
                        );
                    }
                }
                ready.clear();
            }

            while running < self.config.concurrency.max(1) {
                let Some(name) = ready.iter().next().cloned() else {
                    break;
                };
                ready.remove(&name);
                states.insert(name.clone(), JobState::Running);
                running += 1;

                let package = packages.get(&name).expect("package resolved above").clone();
                let backend = Arc::clone(&backend);
                let publisher = publisher.clone();
                let tx = tx.clone();
                let verbose = self.config.verbose;

                pool.spawn(move || {
                    let started = Instant::now();
                    let (outcome, publish) =
                        run_job(&package, backend.as_ref(), publisher.as_deref(), verbose);
                    // The receiver only goes away when the loop is done,
                    // and the loop waits for every running job first.
                    let _ = tx.send(WorkerMessage {
                        package: package.name,
                        outcome,
                        publish,
                        duration: started.elapsed(),
                    });
                });
            }

            if running == 0 {
                break;
            }

            let message = rx.recv().expect("worker channel closed with jobs in flight");
            running -= 1;

            let name = message.package.clone();
            match &message.outcome {
                JobOutcome::Succeeded | JobOutcome::WouldBuild => {
                    states.insert(name.clone(), JobState::Succeeded);
                    for dependent in dependents.get(&name).into_iter().flatten() {
                        if let Some(remaining) = deps_remaining.get_mut(dependent) {
                            *remaining -= 1;
                            if *remaining == 0
                                && states.get(dependent) == Some(&JobState::Pending)
                            {
                                states.insert(dependent.clone(), JobState::Ready);
                                ready.insert(dependent.clone());
                            }
                        }
                    }
                }
                JobOutcome::Failed(_) => {
                    states.insert(name.clone(), JobState::Failed);
                    propagate_skip(&name, &dependents, &mut states, &mut ready, &mut results);
                }
                JobOutcome::Skipped(_) => {
                    // An in-flight job cancelled under it; dependents can
                    // never become ready.
                    states.insert(name.clone(), JobState::Skipped);
                    propagate_skip(&name, &dependents, &mut states, &mut ready, &mut results);
                }
            }
            results.insert(name, (message.outcome, message.duration, message.publish));
        }
        drop(tx);

        let jobs = closure
            .entries()
            .iter()
            .map(|entry| {
                let (outcome, duration, publish) = results
                    .remove(&entry.name)
                    .unwrap_or((JobOutcome::Skipped(SkipReason::Cancelled), Duration::ZERO, None));
                JobReport {
                    package: entry.name.clone(),
                    reason: entry.reason,
                    outcome,
                    duration,
                    publish,
                }
            })
            .collect();

        Ok(BuildReport::new(jobs, started_at))
    }

    fn dry_run_report(
        &self,
        closure: &BuildClosure,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> BuildReport {
        let jobs = closure
            .entries()
            .iter()
            .map(|entry| JobReport {
                package: entry.name.clone(),
                reason: entry.reason,
                outcome: JobOutcome::WouldBuild,
                duration: Duration::ZERO,
                publish: None,
            })
            .collect();
        BuildReport::new(jobs, started_at)
    }
}

/// Transitively skip every dependent of a job that did not succeed.
///
/// Each skipped job records the direct dependency that let it down.
fn propagate_skip(
    root: &str,
    dependents: &BTreeMap<String, Vec<String>>,
    states: &mut BTreeMap<String, JobState>,
    ready: &mut BTreeSet<String>,
    results: &mut BTreeMap<String, (JobOutcome, Duration, Option<PublishOutcome>)>,
) {
    let mut queue: VecDeque<(String, String)> = dependents
        .get(root)
        .into_iter()
        .flatten()
        .map(|d| (d.clone(), root.to_string()))
        .collect();

    while let Some((name, cause)) = queue.pop_front() {
        let state = states.get(&name).copied().unwrap_or(JobState::Pending);
        if state.is_terminal() || state == JobState::Running {
            continue;
        }

        states.insert(name.clone(), JobState::Skipped);
        ready.remove(&name);
        results.insert(
            name.clone(),
            (
                JobOutcome::Skipped(SkipReason::DependencyFailed(cause)),
                Duration::ZERO,
                None,
            ),
        );

        for next in dependents.get(&name).into_iter().flatten() {
            queue.push_back((next.clone(), name.clone()));
        }
    }
}

/// Execute one package's step sequence on the backend.
///
/// Steps run in order (install, build, test), each only if the manifest
/// declares the script; the first failure aborts the rest. The publish
/// pipeline runs last, for succeeded jobs only, and its failures stay out
/// of the job outcome.
fn run_job(
    package: &Package,
    backend: &dyn ExecutionBackend,
    publisher: Option<&PublishPipeline>,
    verbose: bool,
) -> (JobOutcome, Option<PublishOutcome>) {
    for step in StepKind::build_sequence() {
        let Some(script) = package.script(step.script_name()) else {
            continue;
        };

        if verbose {
            println!("[{}] {} step: {}", package.name, step, script);
        }

        let command = LogicalCommand::shell(script, &package.dir)
            .with_env("GANTRY_PACKAGE_NAME", &package.name)
            .with_env("GANTRY_PACKAGE_VERSION", package.version.to_string());

        match backend.execute(&command) {
            Ok(output) if output.success() => {}
            Ok(output) => {
                return (
                    JobOutcome::Failed(FailureCause::StepFailed {
                        step,
                        exit_code: output.exit_code,
                        output: output.combined(),
                    }),
                    None,
                )
            }
            Err(ExecError::Timeout { limit }) => {
                return (
                    JobOutcome::Failed(FailureCause::Timeout { step, limit }),
                    None,
                )
            }
            Err(ExecError::Cancelled) => {
                return (JobOutcome::Skipped(SkipReason::Cancelled), None)
            }
            Err(error) => {
                return (
                    JobOutcome::Failed(FailureCause::Infrastructure {
                        step,
                        error: error.to_string(),
                    }),
                    None,
                )
            }
        }
    }

    let publish = publisher.map(|pipeline| pipeline.publish(package, backend));
    (JobOutcome::Succeeded, publish)
}

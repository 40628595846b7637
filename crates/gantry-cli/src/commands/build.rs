//! Build command (gantry build)

use crate::collaborators::{FileRegistry, GitVcs};
use crate::config::EffectiveConfig;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use gantry_build::{
    BuildReport, FailureCause, JobOutcome, PublishOutcome, PublishPipeline, Scheduler,
    SchedulerConfig, Vcs,
};
use gantry_exec::{
    AgentBackend, AgentBackendConfig, AgentSetup, ExecutionBackend, HostAgentPool, LocalBackend,
};
use gantry_graph::{BuildClosure, PackageGraph};
use gantry_manifest::Workspace;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Arguments for the build command
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub packages: Vec<String>,
    pub upto: Vec<String>,
    pub message: String,
    pub since: Option<String>,
    pub concurrency: Option<usize>,
    pub dry_run: bool,
    pub publish: bool,
    pub agent: bool,
    pub timeout: Option<u64>,
    pub verbose: bool,
    pub quiet: bool,
}

/// Run the build command. Returns the process exit code: zero only when
/// every job in the closure succeeded (and published, with --publish).
pub fn run(args: BuildArgs) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;

    let spinner = make_spinner(args.quiet);
    spinner.set_message("Scanning workspace...");

    let workspace = Workspace::load(&cwd).context("Failed to load workspace")?;
    if workspace.is_empty() {
        spinner.finish_and_clear();
        println!("No packages found in {}", workspace.root.display());
        return Ok(0);
    }

    spinner.set_message("Resolving dependency graph...");
    let graph = PackageGraph::build(workspace.packages.clone())
        .context("Failed to resolve dependency graph")?;

    // Explicit package names must exist; a typo silently building nothing
    // would be worse than an error.
    for name in &args.packages {
        if graph.package(name).is_none() {
            spinner.finish_and_clear();
            bail!("Unknown package: {name}");
        }
    }

    let changed: Option<BTreeSet<String>> = if !args.packages.is_empty() {
        Some(args.packages.iter().cloned().collect())
    } else if let Some(marker) = &args.since {
        spinner.set_message("Asking version control for changes...");
        let vcs = GitVcs::new(&workspace);
        Some(
            vcs.changed_packages_since(Some(marker))
                .context("Failed to compute changed packages")?,
        )
    } else {
        None
    };

    let targets: Option<BTreeSet<String>> = if args.upto.is_empty() {
        None
    } else {
        Some(args.upto.iter().cloned().collect())
    };

    let closure = BuildClosure::assemble(&graph, changed.as_ref(), targets.as_ref())
        .context("Failed to assemble build closure")?;
    spinner.finish_and_clear();

    if closure.is_empty() {
        println!("Nothing to build");
        return Ok(0);
    }

    if !args.quiet {
        println!(
            "Building {} of {} packages{}",
            closure.len(),
            workspace.len(),
            if args.dry_run { " (dry run)" } else { "" }
        );
    }

    let config = EffectiveConfig::resolve(&workspace.config, args.concurrency, args.timeout);
    let backend = make_backend(&args, &config);

    let publisher = if args.publish && !args.dry_run {
        let registry = FileRegistry::new(workspace.root.join(".gantry/published.json"));
        let vcs = GitVcs::new(&workspace);
        let mut pipeline =
            PublishPipeline::new(Arc::new(registry), Arc::new(vcs), args.message.clone());
        if let Some(token) = &config.registry_token {
            pipeline = pipeline.with_registry_credential(token.clone());
        }
        Some(Arc::new(pipeline))
    } else {
        None
    };

    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency: config.concurrency,
        dry_run: args.dry_run,
        verbose: args.verbose,
    });

    let report = scheduler
        .run(&graph, &closure, backend.clone(), publisher)
        .context("Build scheduling failed")?;
    backend.close();

    render_report(&report, args.quiet);

    let ok = if args.publish {
        report.success_including_publish()
    } else {
        report.success()
    };
    Ok(if ok { 0 } else { 1 })
}

fn make_backend(args: &BuildArgs, config: &EffectiveConfig) -> Arc<dyn ExecutionBackend> {
    if args.agent {
        let pool = Arc::new(HostAgentPool::in_temp_dir());
        let mut setup = AgentSetup::new();
        if let Some(token) = &config.registry_token {
            setup = setup.with_secret("GANTRY_REGISTRY_TOKEN", token.clone());
        }
        Arc::new(
            AgentBackend::new(pool, setup).with_config(AgentBackendConfig {
                timeout: config.step_timeout,
                ..Default::default()
            }),
        )
    } else {
        Arc::new(LocalBackend::new().with_timeout(config.step_timeout))
    }
}

fn make_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Print the per-package report, failures with their captured output
fn render_report(report: &BuildReport, quiet: bool) {
    if !quiet {
        println!();
        for job in report.jobs() {
            let line = match &job.outcome {
                JobOutcome::Succeeded => format!(
                    "{} {} ({:.1}s)",
                    "✓".green(),
                    job.package,
                    job.duration.as_secs_f64()
                ),
                JobOutcome::WouldBuild => {
                    format!("{} {} (would build)", "→".blue(), job.package)
                }
                JobOutcome::Failed(cause) => {
                    format!("{} {}: {}", "✗".red(), job.package, cause.describe())
                }
                JobOutcome::Skipped(reason) => format!(
                    "{} {} (skipped: {})",
                    "→".yellow(),
                    job.package,
                    reason.describe()
                ),
            };
            println!("  {line}");

            if let Some(publish) = &job.publish {
                let publish_line = match publish {
                    PublishOutcome::Published { version } => {
                        format!("{} published {}", "✓".green(), version)
                    }
                    PublishOutcome::Skipped { reason } => {
                        format!("{} publish skipped: {reason}", "→".blue())
                    }
                    PublishOutcome::Failed { error } => {
                        format!("{} publish failed: {error}", "✗".red())
                    }
                };
                println!("      {publish_line}");
            }

            if let JobOutcome::Failed(FailureCause::StepFailed { output, .. }) = &job.outcome {
                if !output.is_empty() {
                    for line in output.lines().take(20) {
                        println!("      {}", line.dimmed());
                    }
                }
            }
        }
    }

    let (succeeded, failed, skipped) = report.counts();
    println!();
    println!(
        "Build finished: {} succeeded, {} failed, {} skipped",
        succeeded, failed, skipped
    );
}

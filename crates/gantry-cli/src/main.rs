use anyhow::Result;
use clap::{Parser, Subcommand};

mod collaborators;
mod commands;
mod config;

/// Gantry multi-package build orchestrator.
///
/// Gantry reads the gantry.toml manifests of a workspace, resolves the
/// internal dependency graph, and builds whatever a change invalidates, in
/// dependency order, with bounded concurrency.
///
/// EXAMPLES:
///     gantry build                     Build every package
///     gantry build b-package           Build b-package and its dependents
///     gantry build --upto c-package    Build c-package and its dependencies
///     gantry build --since origin/main Build what changed since a ref
///     gantry graph                     Show the resolved dependency graph
///     gantry list                      List workspace packages
///
/// ENVIRONMENT VARIABLES:
///     GANTRY_CONCURRENCY     Default for --concurrency
///     GANTRY_REGISTRY_TOKEN  Registry credential for --publish
#[derive(Parser)]
#[command(name = "gantry")]
#[command(version)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, see: https://github.com/gantry-build/gantry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build packages in dependency order
    ///
    /// Positional PACKAGES seed the changed set explicitly; --since derives
    /// it from version control; with neither, every package builds. --upto
    /// adds a target's full dependency chain to the closure.
    ///
    /// EXAMPLES:
    ///     gantry build                          Build everything
    ///     gantry build b-package -m "fix"       b-package and dependents
    ///     gantry build --upto c-package         c-package and dependencies
    ///     gantry build --publish --since v1.2   Build and publish changes
    #[command(visible_alias = "b")]
    Build {
        /// Packages to treat as changed
        packages: Vec<String>,
        /// Build up to these packages (dependency chains included)
        #[arg(long, value_name = "PACKAGE")]
        upto: Vec<String>,
        /// Commit message used when publishing version bumps
        #[arg(long, short = 'm', default_value = "gantry build")]
        message: String,
        /// Derive the changed set from version control since this ref
        #[arg(long, value_name = "REF")]
        since: Option<String>,
        /// Maximum concurrent package builds
        #[arg(long, short = 'j', env = "GANTRY_CONCURRENCY")]
        concurrency: Option<usize>,
        /// Resolve and report without executing anything
        #[arg(long)]
        dry_run: bool,
        /// Publish packages whose version is ahead of the registry
        #[arg(long)]
        publish: bool,
        /// Run build steps through an acquired agent instance
        #[arg(long)]
        agent: bool,
        /// Per-step timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Verbose output with per-step progress
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Quiet output (summary only)
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Print the resolved dependency graph
    ///
    /// EXAMPLES:
    ///     gantry graph                 Human-readable edges and order
    ///     gantry graph --format json   Machine-readable graph
    Graph {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: commands::graph::Format,
    },

    /// List workspace packages with their versions
    #[command(visible_alias = "ls")]
    List,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<i32> = match cli.command {
        Commands::Build {
            packages,
            upto,
            message,
            since,
            concurrency,
            dry_run,
            publish,
            agent,
            timeout,
            verbose,
            quiet,
        } => commands::build::run(commands::build::BuildArgs {
            packages,
            upto,
            message,
            since,
            concurrency,
            dry_run,
            publish,
            agent,
            timeout,
            verbose,
            quiet,
        }),
        Commands::Graph { format } => commands::graph::run(format),
        Commands::List => commands::list::run(),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

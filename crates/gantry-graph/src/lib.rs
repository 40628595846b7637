//! Gantry dependency graph
//!
//! Resolves declared semantic-version ranges against the packages actually
//! present in the workspace, producing a directed acyclic graph, and
//! computes the build closures (invalidation and upto) consumed by the
//! scheduler.

pub mod closure;
pub mod graph;

pub use closure::{BuildClosure, ClosureEntry, ClosureReason};
pub use graph::{DependencyEdge, PackageGraph};

/// Graph construction and closure errors
///
/// All of these are configuration errors: fatal, reported before any build
/// job runs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Circular dependency detected: {path}")]
    Cycle { path: String },

    #[error(
        "Package '{dependent}' requires '{dependency}' {range}, \
         but the workspace copy is {found}"
    )]
    UnsatisfiedRange {
        dependent: String,
        dependency: String,
        range: String,
        found: semver::Version,
    },

    #[error("Package '{package}' declares an invalid range '{range}' for '{dependency}': {source}")]
    InvalidRange {
        package: String,
        dependency: String,
        range: String,
        source: semver::Error,
    },

    #[error("Unknown package: {0}")]
    UnknownPackage(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

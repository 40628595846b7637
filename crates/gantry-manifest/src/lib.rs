//! Gantry package manifests
//!
//! Parsing for per-package `gantry.toml` files, the workspace-level
//! `[workspace]` configuration, and the directory scan that turns a
//! repository into a set of [`Package`] records.

pub mod manifest;
pub mod workspace;

pub use manifest::{Package, PackageManifest, PackageMetadata};
pub use workspace::{discover_packages, find_workspace_root, Workspace, WorkspaceConfig};

use std::path::PathBuf;

/// Manifest and workspace-scan errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Duplicate package name '{name}' declared in {first} and {second}")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },

    #[error("No workspace manifest found in {0} or any parent directory")]
    WorkspaceNotFound(PathBuf),
}

impl ManifestError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;

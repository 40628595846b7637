//! Workspace discovery
//!
//! Walks a repository root collecting every `gantry.toml` that declares a
//! package, honoring the root manifest's `[workspace]` member patterns.

use crate::manifest::{Package, PackageManifest};
use crate::{ManifestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The manifest file name looked for in every package directory
pub const MANIFEST_FILE: &str = "gantry.toml";

/// Directories never descended into during the scan
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "dist"];

/// Workspace configuration (`[workspace]` table of the root gantry.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Member directory patterns relative to the workspace root.
    /// A trailing `/*` matches any direct child. Empty means scan everything.
    #[serde(default)]
    pub members: Vec<String>,
    /// Default scheduler concurrency
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Registry address published packages go to
    #[serde(default)]
    pub registry: Option<String>,
    /// Default per-step timeout in seconds
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

impl WorkspaceConfig {
    /// Whether a package directory (relative to the root) is a member
    pub fn is_member(&self, rel_dir: &Path) -> bool {
        if self.members.is_empty() {
            return true;
        }
        self.members.iter().any(|pattern| member_matches(pattern, rel_dir))
    }
}

/// Match a member pattern against a relative directory.
///
/// `packages/*` matches any direct child of `packages/`; a pattern without a
/// wildcard matches that exact directory.
fn member_matches(pattern: &str, rel_dir: &Path) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix = Path::new(prefix);
        match rel_dir.strip_prefix(prefix) {
            Ok(rest) => rest.components().count() == 1,
            Err(_) => false,
        }
    } else {
        rel_dir == Path::new(pattern)
    }
}

/// A discovered workspace: root, configuration, and member packages
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Workspace root directory
    pub root: PathBuf,
    /// Root `[workspace]` configuration
    pub config: WorkspaceConfig,
    /// Member packages keyed by name
    pub packages: BTreeMap<String, Package>,
}

impl Workspace {
    /// Load the workspace anchored at (or above) `start_dir`
    pub fn load(start_dir: &Path) -> Result<Self> {
        let root = find_workspace_root(start_dir)?;
        let root_manifest = PackageManifest::from_file(&root.join(MANIFEST_FILE))?;
        let config = root_manifest.workspace.clone().unwrap_or_default();
        let packages = discover_packages(&root, &config)?;

        Ok(Self {
            root,
            config,
            packages,
        })
    }

    /// Get a package by name
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Number of member packages
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the workspace has no member packages
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Map a repository-relative file path to the package containing it,
    /// preferring the deepest matching package directory.
    pub fn package_for_path(&self, rel_path: &Path) -> Option<&Package> {
        self.packages
            .values()
            .filter(|p| {
                p.dir
                    .strip_prefix(&self.root)
                    .map(|dir| rel_path.starts_with(dir))
                    .unwrap_or(false)
            })
            .max_by_key(|p| p.dir.components().count())
    }
}

/// Find the workspace root by walking up from `start_dir`
///
/// The root is the nearest directory containing a `gantry.toml` with a
/// `[workspace]` table. A directory whose `gantry.toml` only declares a
/// package is a member, not a root, so the walk continues upward.
pub fn find_workspace_root(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir
        .canonicalize()
        .unwrap_or_else(|_| start_dir.to_path_buf());

    loop {
        let manifest_path = current.join(MANIFEST_FILE);
        if manifest_path.exists() {
            let manifest = PackageManifest::from_file(&manifest_path)?;
            if manifest.is_workspace() {
                return Ok(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Err(ManifestError::WorkspaceNotFound(start_dir.to_path_buf())),
        }
    }
}

/// Scan the workspace root for member package manifests
///
/// Every `gantry.toml` below the root with a `[package]` table becomes a
/// [`Package`], except those excluded by the member patterns. The root
/// manifest itself participates only if it also declares a package.
pub fn discover_packages(
    root: &Path,
    config: &WorkspaceConfig,
) -> Result<BTreeMap<String, Package>> {
    let mut packages: BTreeMap<String, Package> = BTreeMap::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
            continue;
        }

        let manifest_path = entry.path();
        let dir = manifest_path.parent().unwrap_or(root).to_path_buf();
        let rel_dir = dir.strip_prefix(root).unwrap_or(&dir).to_path_buf();

        // The root manifest is the workspace anchor; it only contributes a
        // package if it declares one, and member patterns don't apply to it.
        let is_root = dir == root;
        if !is_root && !config.is_member(&rel_dir) {
            continue;
        }

        let manifest = PackageManifest::from_file(manifest_path)?;
        let Some(package) = Package::from_manifest(&manifest, &dir) else {
            continue;
        };

        if let Some(existing) = packages.get(&package.name) {
            return Err(ManifestError::DuplicateName {
                name: package.name.clone(),
                first: existing.dir.display().to_string(),
                second: dir.display().to_string(),
            });
        }

        packages.insert(package.name.clone(), package);
    }

    Ok(packages)
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_matches_exact() {
        assert!(member_matches("tools/scanner", Path::new("tools/scanner")));
        assert!(!member_matches("tools/scanner", Path::new("tools/other")));
    }

    #[test]
    fn test_member_matches_wildcard() {
        assert!(member_matches("packages/*", Path::new("packages/a")));
        assert!(!member_matches("packages/*", Path::new("packages/a/nested")));
        assert!(!member_matches("packages/*", Path::new("other/a")));
    }

    #[test]
    fn test_empty_members_matches_all() {
        let config = WorkspaceConfig::default();
        assert!(config.is_member(Path::new("anything/at/all")));
    }
}

//! Package manifest parsing and types (gantry.toml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::workspace::WorkspaceConfig;

/// Package manifest (gantry.toml)
///
/// A manifest may declare a package, a workspace, or both (a root package
/// that also anchors the workspace, the way Cargo allows).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    #[serde(default)]
    pub package: Option<PackageMetadata>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub workspace: Option<WorkspaceConfig>,
}

impl PackageManifest {
    /// Parse manifest from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load manifest from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| crate::ManifestError::io(path, e))?;
        Ok(Self::from_str(&content)?)
    }

    /// Serialize to TOML string
    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Whether this manifest declares a package
    pub fn is_package(&self) -> bool {
        self.package.is_some()
    }

    /// Whether this manifest anchors a workspace
    pub fn is_workspace(&self) -> bool {
        self.workspace.is_some()
    }
}

/// Package metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageMetadata {
    pub name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
}

/// A package resolved from a manifest on disk
///
/// Identity, version, directory, declared dependency ranges, and the named
/// shell scripts the orchestrator may run. Constructed once per workspace
/// scan and immutable afterwards; build status lives in the scheduler, not
/// here.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    /// Package name, unique within the workspace
    pub name: String,
    /// Declared version
    pub version: semver::Version,
    /// Directory containing the package's gantry.toml
    pub dir: PathBuf,
    /// Dependency name -> version range expression
    pub dependencies: BTreeMap<String, String>,
    /// Script name -> shell command string
    pub scripts: BTreeMap<String, String>,
}

impl Package {
    /// Build a package record from a parsed manifest and its directory
    ///
    /// Returns `None` when the manifest has no `[package]` table (a
    /// workspace-only root manifest).
    pub fn from_manifest(manifest: &PackageManifest, dir: impl Into<PathBuf>) -> Option<Self> {
        let meta = manifest.package.as_ref()?;
        Some(Self {
            name: meta.name.clone(),
            version: meta.version.clone(),
            dir: dir.into(),
            dependencies: manifest.dependencies.clone(),
            scripts: manifest.scripts.clone(),
        })
    }

    /// Look up a script by name
    pub fn script(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let toml = r#"
            [package]
            name = "my-package"
            version = "1.0.0"
        "#;

        let manifest = PackageManifest::from_str(toml).unwrap();
        let package = manifest.package.as_ref().unwrap();
        assert_eq!(package.name, "my-package");
        assert_eq!(package.version.to_string(), "1.0.0");
        assert!(manifest.is_package());
        assert!(!manifest.is_workspace());
    }

    #[test]
    fn test_parse_complete_manifest() {
        let toml = r#"
            [package]
            name = "b-package"
            version = "2.0.0"
            description = "A middle-tier package"
            authors = ["Alice <alice@example.com>"]
            license = "MIT"

            [dependencies]
            c-package = "^3.0.0"

            [scripts]
            install = "npm ci"
            build = "npm run build"
            test = "npm test"
            publish = "npm publish"
        "#;

        let manifest = PackageManifest::from_str(toml).unwrap();
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(
            manifest.dependencies.get("c-package").map(String::as_str),
            Some("^3.0.0")
        );
        assert_eq!(manifest.scripts.len(), 4);
    }

    #[test]
    fn test_parse_workspace_only_manifest() {
        let toml = r#"
            [workspace]
            members = ["packages/*"]
            concurrency = 4
        "#;

        let manifest = PackageManifest::from_str(toml).unwrap();
        assert!(!manifest.is_package());
        assert!(manifest.is_workspace());
        assert_eq!(manifest.workspace.as_ref().unwrap().concurrency, Some(4));
    }

    #[test]
    fn test_package_from_manifest() {
        let toml = r#"
            [package]
            name = "a-package"
            version = "1.2.3"

            [dependencies]
            b-package = "~2.1.0"

            [scripts]
            build = "make"
        "#;

        let manifest = PackageManifest::from_str(toml).unwrap();
        let package = Package::from_manifest(&manifest, "/ws/a").unwrap();
        assert_eq!(package.name, "a-package");
        assert_eq!(package.version, semver::Version::new(1, 2, 3));
        assert_eq!(package.dir, PathBuf::from("/ws/a"));
        assert_eq!(package.script("build"), Some("make"));
        assert_eq!(package.script("test"), None);
    }

    #[test]
    fn test_package_from_workspace_only_manifest_is_none() {
        let toml = r#"
            [workspace]
            members = []
        "#;

        let manifest = PackageManifest::from_str(toml).unwrap();
        assert!(Package::from_manifest(&manifest, "/ws").is_none());
    }

    #[test]
    fn test_invalid_version_is_parse_error() {
        let toml = r#"
            [package]
            name = "broken"
            version = "not-a-version"
        "#;

        assert!(PackageManifest::from_str(toml).is_err());
    }
}

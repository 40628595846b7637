//! Git and registry collaborator implementations
//!
//! The build core only knows the `Vcs` and `Registry` traits; this module
//! provides the shipped implementations: `git` shell-outs and a JSON
//! version-marker file standing in for a registry's publish records.

use gantry_build::{BuildError, Registry, Vcs};
use gantry_manifest::Workspace;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// Version control via the `git` binary
pub struct GitVcs {
    root: PathBuf,
    /// Package name -> directory relative to the root, for mapping changed
    /// file paths back to packages
    package_dirs: BTreeMap<String, PathBuf>,
}

impl GitVcs {
    pub fn new(workspace: &Workspace) -> Self {
        let package_dirs = workspace
            .packages
            .values()
            .map(|p| {
                let rel = p
                    .dir
                    .strip_prefix(&workspace.root)
                    .unwrap_or(&p.dir)
                    .to_path_buf();
                (p.name.clone(), rel)
            })
            .collect();

        Self {
            root: workspace.root.clone(),
            package_dirs,
        }
    }

    fn git(&self, args: &[&str]) -> Result<String, BuildError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| BuildError::Vcs(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            return Err(BuildError::Vcs(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Map a repository-relative path to the deepest package containing it
    fn package_for(&self, rel_path: &Path) -> Option<&str> {
        self.package_dirs
            .iter()
            .filter(|(_, dir)| rel_path.starts_with(dir))
            .max_by_key(|(_, dir)| dir.components().count())
            .map(|(name, _)| name.as_str())
    }
}

impl Vcs for GitVcs {
    fn changed_packages_since(&self, marker: Option<&str>) -> Result<BTreeSet<String>, BuildError> {
        let stdout = match marker {
            Some(marker) => {
                let range = format!("{marker}..HEAD");
                self.git(&["diff", "--name-only", &range])?
            }
            // No marker: uncommitted work
            None => self.git(&["diff", "--name-only", "HEAD"])?,
        };

        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| self.package_for(Path::new(line)))
            .map(String::from)
            .collect())
    }

    fn commit_and_push(&self, message: &str, files: &[PathBuf]) -> Result<(), BuildError> {
        let mut add_args = vec!["add", "--"];
        let file_strings: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
        add_args.extend(file_strings.iter().map(String::as_str));
        self.git(&add_args)?;

        self.git(&["commit", "--allow-empty", "-m", message])?;
        self.git(&["push"])?;
        Ok(())
    }
}

/// Registry stand-in: a JSON file in the workspace recording the last
/// published version per package. Real registries live behind the same
/// trait; publishing itself always goes through the package's publish
/// script.
pub struct FileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_versions(&self) -> Result<BTreeMap<String, String>, BuildError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| BuildError::Registry(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| BuildError::Registry(format!("{}: {e}", self.path.display())))
    }
}

impl Registry for FileRegistry {
    fn last_published_version(&self, package: &str) -> Result<Option<Version>, BuildError> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let versions = self.read_versions()?;
        versions
            .get(package)
            .map(|raw| {
                Version::parse(raw)
                    .map_err(|e| BuildError::Registry(format!("bad version for {package}: {e}")))
            })
            .transpose()
    }

    fn record_published(&self, package: &str, version: &Version) -> Result<(), BuildError> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let mut versions = self.read_versions()?;
        versions.insert(package.to_string(), version.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BuildError::Registry(format!("{}: {e}", parent.display())))?;
        }
        let content = serde_json::to_string_pretty(&versions)
            .map_err(|e| BuildError::Registry(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| BuildError::Registry(format!("{}: {e}", self.path.display())))
    }
}

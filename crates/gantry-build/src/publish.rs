//! Publish pipeline and collaborator boundaries
//!
//! Publishing is a post-build concern: it runs only for succeeded jobs
//! whose version is ahead of the registry, and its failures never
//! retroactively fail the build.

use crate::job::StepKind;
use crate::report::PublishOutcome;
use crate::{BuildError, Result};
use gantry_exec::{ExecutionBackend, LogicalCommand};
use gantry_manifest::workspace::MANIFEST_FILE;
use gantry_manifest::Package;
use semver::Version;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Registry collaborator boundary.
///
/// The core never talks to a registry directly; publishing happens through
/// the package's own publish script. The registry's only job here is
/// remembering what has been published.
pub trait Registry: Send + Sync {
    /// The last version published for a package, `None` if never published
    fn last_published_version(&self, package: &str) -> Result<Option<Version>>;

    /// Record a successful publish. Registries that learn versions from the
    /// publish itself can leave this as the default no-op.
    fn record_published(&self, _package: &str, _version: &Version) -> Result<()> {
        Ok(())
    }
}

/// Version-control collaborator boundary
pub trait Vcs: Send + Sync {
    /// Package names touched since the given marker (a ref, tag, or
    /// whatever the implementation understands)
    fn changed_packages_since(&self, marker: Option<&str>) -> Result<BTreeSet<String>>;

    /// Commit the given files and push
    fn commit_and_push(&self, message: &str, files: &[PathBuf]) -> Result<()>;
}

/// Post-build publish step for succeeded jobs
pub struct PublishPipeline {
    registry: Arc<dyn Registry>,
    vcs: Arc<dyn Vcs>,
    /// Commit message for the version-control step
    message: String,
    /// Registry credential, injected into the publish script's environment
    /// as a secret entry
    registry_credential: Option<String>,
    /// Commits from concurrent workers are serialized
    vcs_lock: Mutex<()>,
}

impl PublishPipeline {
    pub fn new(registry: Arc<dyn Registry>, vcs: Arc<dyn Vcs>, message: impl Into<String>) -> Self {
        Self {
            registry,
            vcs,
            message: message.into(),
            registry_credential: None,
            vcs_lock: Mutex::new(()),
        }
    }

    pub fn with_registry_credential(mut self, token: impl Into<String>) -> Self {
        self.registry_credential = Some(token.into());
        self
    }

    /// Publish one succeeded package.
    ///
    /// Skips when the version is not ahead of the registry or the package
    /// has no publish script; every failure comes back as
    /// [`PublishOutcome::Failed`] rather than an error.
    pub fn publish(&self, package: &Package, backend: &dyn ExecutionBackend) -> PublishOutcome {
        let last = match self.registry.last_published_version(&package.name) {
            Ok(last) => last,
            Err(e) => {
                return PublishOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        if let Some(last) = &last {
            if package.version <= *last {
                return PublishOutcome::Skipped {
                    reason: format!(
                        "version {} is not ahead of published {last}",
                        package.version
                    ),
                };
            }
        }

        let Some(script) = package.script(StepKind::Publish.script_name()) else {
            return PublishOutcome::Skipped {
                reason: "no publish script".to_string(),
            };
        };

        let mut command = LogicalCommand::shell(script, &package.dir)
            .with_env("GANTRY_PACKAGE_NAME", &package.name)
            .with_env("GANTRY_PACKAGE_VERSION", package.version.to_string());
        if let Some(token) = &self.registry_credential {
            command = command.with_secret("GANTRY_REGISTRY_TOKEN", token);
        }

        match backend.execute(&command) {
            Ok(output) if output.success() => {}
            Ok(output) => {
                return PublishOutcome::Failed {
                    error: format!(
                        "publish script exited with code {}: {}",
                        output.exit_code,
                        output.combined()
                    ),
                }
            }
            Err(e) => {
                return PublishOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }

        if let Err(e) = self
            .registry
            .record_published(&package.name, &package.version)
        {
            return PublishOutcome::Failed {
                error: e.to_string(),
            };
        }

        let _serialized = self.vcs_lock.lock().expect("vcs lock poisoned");
        let manifest_path = package.dir.join(MANIFEST_FILE);
        if let Err(e) = self.vcs.commit_and_push(&self.message, &[manifest_path]) {
            return PublishOutcome::Failed {
                error: e.to_string(),
            };
        }

        PublishOutcome::Published {
            version: package.version.clone(),
        }
    }
}

/// In-memory registry, for tests and dry scenarios
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    versions: Mutex<std::collections::BTreeMap<String, Version>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, package: &str, version: Version) -> Self {
        self.versions
            .lock()
            .expect("registry lock poisoned")
            .insert(package.to_string(), version);
        self
    }
}

impl Registry for MemoryRegistry {
    fn last_published_version(&self, package: &str) -> Result<Option<Version>> {
        Ok(self
            .versions
            .lock()
            .expect("registry lock poisoned")
            .get(package)
            .cloned())
    }

    fn record_published(&self, package: &str, version: &Version) -> Result<()> {
        self.versions
            .lock()
            .expect("registry lock poisoned")
            .insert(package.to_string(), version.clone());
        Ok(())
    }
}

/// Vcs implementation that records commit calls without touching any
/// repository; used by tests and `--dry-run` style flows.
#[derive(Debug, Default)]
pub struct RecordingVcs {
    pub commits: Mutex<Vec<String>>,
    changed: Mutex<BTreeSet<String>>,
}

impl RecordingVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_changed(self, names: &[&str]) -> Self {
        {
            let mut changed = self.changed.lock().expect("vcs lock poisoned");
            for name in names {
                changed.insert(name.to_string());
            }
        }
        self
    }
}

impl Vcs for RecordingVcs {
    fn changed_packages_since(&self, _marker: Option<&str>) -> Result<BTreeSet<String>> {
        Ok(self.changed.lock().expect("vcs lock poisoned").clone())
    }

    fn commit_and_push(&self, message: &str, _files: &[PathBuf]) -> Result<()> {
        self.commits
            .lock()
            .expect("vcs lock poisoned")
            .push(message.to_string());
        Ok(())
    }
}

/// Vcs that always fails; exercises the failure isolation path
#[derive(Debug, Default)]
pub struct FailingVcs;

impl Vcs for FailingVcs {
    fn changed_packages_since(&self, _marker: Option<&str>) -> Result<BTreeSet<String>> {
        Err(BuildError::Vcs("no repository".to_string()))
    }

    fn commit_and_push(&self, _message: &str, _files: &[PathBuf]) -> Result<()> {
        Err(BuildError::Vcs("push rejected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_exec::LocalBackend;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn package_in(dir: &TempDir, version: &str, publish_script: Option<&str>) -> Package {
        let mut scripts = BTreeMap::new();
        if let Some(script) = publish_script {
            scripts.insert("publish".to_string(), script.to_string());
        }
        Package {
            name: "pub-package".to_string(),
            version: Version::parse(version).unwrap(),
            dir: dir.path().to_path_buf(),
            dependencies: BTreeMap::new(),
            scripts,
        }
    }

    fn pipeline(registry: MemoryRegistry, vcs: Arc<RecordingVcs>) -> PublishPipeline {
        PublishPipeline::new(Arc::new(registry), vcs, "release commit")
    }

    #[test]
    fn test_publish_first_version() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::new());
        let pipeline = pipeline(MemoryRegistry::new(), vcs.clone());
        let package = package_in(&temp, "1.0.0", Some("true"));

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                version: Version::new(1, 0, 0)
            }
        );
        assert_eq!(vcs.commits.lock().unwrap().as_slice(), &["release commit"]);
    }

    #[test]
    fn test_publish_skipped_when_not_ahead() {
        let temp = TempDir::new().unwrap();
        let registry = MemoryRegistry::new().with_version("pub-package", Version::new(1, 0, 0));
        let vcs = Arc::new(RecordingVcs::new());
        let pipeline = pipeline(registry, vcs.clone());
        let package = package_in(&temp, "1.0.0", Some("true"));

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        assert!(matches!(outcome, PublishOutcome::Skipped { .. }));
        assert!(vcs.commits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_publish_runs_for_newer_version() {
        let temp = TempDir::new().unwrap();
        let registry = MemoryRegistry::new().with_version("pub-package", Version::new(1, 0, 0));
        let vcs = Arc::new(RecordingVcs::new());
        let pipeline = pipeline(registry, vcs);
        let package = package_in(&temp, "1.1.0", Some("true"));

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                version: Version::new(1, 1, 0)
            }
        );
    }

    #[test]
    fn test_publish_skipped_without_script() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::new());
        let pipeline = pipeline(MemoryRegistry::new(), vcs);
        let package = package_in(&temp, "1.0.0", None);

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        assert_eq!(
            outcome,
            PublishOutcome::Skipped {
                reason: "no publish script".to_string()
            }
        );
    }

    #[test]
    fn test_failing_script_is_publish_failure() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::new());
        let pipeline = pipeline(MemoryRegistry::new(), vcs.clone());
        let package = package_in(&temp, "1.0.0", Some("echo broken >&2; exit 7"));

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        match outcome {
            PublishOutcome::Failed { error } => {
                assert!(error.contains("code 7"));
                assert!(error.contains("broken"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        // Script failed: nothing recorded, nothing committed
        assert!(vcs.commits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_vcs_failure_is_publish_failure() {
        let temp = TempDir::new().unwrap();
        let pipeline = PublishPipeline::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(FailingVcs),
            "msg",
        );
        let package = package_in(&temp, "1.0.0", Some("true"));

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        match outcome {
            PublishOutcome::Failed { error } => assert!(error.contains("push rejected")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_credential_injected_into_publish_script() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("token-seen");
        let script = format!(
            "printf '%s' \"$GANTRY_REGISTRY_TOKEN\" > {}",
            marker.display()
        );
        let vcs = Arc::new(RecordingVcs::new());
        let pipeline =
            pipeline(MemoryRegistry::new(), vcs).with_registry_credential("tok-123");
        let package = package_in(&temp, "1.0.0", Some(&script));

        let outcome = pipeline.publish(&package, &LocalBackend::new());
        assert!(matches!(outcome, PublishOutcome::Published { .. }));
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "tok-123");
    }
}

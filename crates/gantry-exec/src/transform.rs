//! Agent protocol command transformation
//!
//! Rewrites a logical command into the concrete form an acquired instance
//! runs: working directory remapped into the instance's tree, setup
//! environment merged in, credentials rendered as secret env entries, and
//! one-shot auth files staged outside the package tree.

use crate::agent::AgentInstance;
use crate::command::{EnvVar, LogicalCommand};
use std::path::PathBuf;

/// A transient credential file written just before execution and removed
/// just after, success or failure. The path is relative to the instance's
/// scratch root, never inside the package tree.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthFile {
    /// File name within the instance scratch root
    pub name: String,
    /// Credential contents; masked in Debug like a secret env value
    contents: String,
    /// Environment variable pointing tools at the written file
    pub env_key: Option<String>,
}

impl AuthFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            env_key: None,
        }
    }

    /// Also export the file's path under the given environment key
    pub fn with_env_key(mut self, key: impl Into<String>) -> Self {
        self.env_key = Some(key.into());
        self
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }
}

impl std::fmt::Debug for AuthFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFile")
            .field("name", &self.name)
            .field("contents", &"***")
            .field("env_key", &self.env_key)
            .finish()
    }
}

/// Per-backend setup shared by every command sent to an instance:
/// environment entries and credential files the commander layer needs.
#[derive(Debug, Clone, Default)]
pub struct AgentSetup {
    pub env: Vec<EnvVar>,
    pub auth_files: Vec<AuthFile>,
}

impl AgentSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(key, value));
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::secret(key, value));
        self
    }

    pub fn with_auth_file(mut self, file: AuthFile) -> Self {
        self.auth_files.push(file);
        self
    }
}

/// A command after transformation for a specific instance
#[derive(Debug, Clone)]
pub struct ConcreteCommand {
    pub script: String,
    pub cwd: PathBuf,
    pub env: Vec<EnvVar>,
    /// Absolute path + contents for each one-shot auth file
    pub auth_files: Vec<(PathBuf, AuthFile)>,
}

/// The agent protocol adapter: logical command + instance + setup -> the
/// concrete command the instance actually runs.
#[derive(Debug, Clone, Default)]
pub struct CommandTransformer;

impl CommandTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Transform a logical command for one acquired instance.
    ///
    /// Relative working directories are resolved against the instance root;
    /// absolute ones are kept (the host-agent model shares the invoking
    /// machine's filesystem). Setup env comes after command env so
    /// per-backend credentials win over per-step defaults.
    pub fn transform(
        &self,
        instance: &AgentInstance,
        command: &LogicalCommand,
        setup: &AgentSetup,
    ) -> ConcreteCommand {
        let cwd = if command.cwd.is_absolute() {
            command.cwd.clone()
        } else {
            instance.root.join(&command.cwd)
        };

        let mut env = command.env.clone();
        env.extend(setup.env.iter().cloned());
        env.push(EnvVar::new("GANTRY_AGENT_ID", instance.id.to_string()));
        env.push(EnvVar::new(
            "GANTRY_AGENT_ROOT",
            instance.root.display().to_string(),
        ));

        let auth_files: Vec<(PathBuf, AuthFile)> = setup
            .auth_files
            .iter()
            .map(|file| (instance.root.join(&file.name), file.clone()))
            .collect();

        for (path, file) in &auth_files {
            if let Some(key) = &file.env_key {
                env.push(EnvVar::new(key.clone(), path.display().to_string()));
            }
        }

        ConcreteCommand {
            script: command.script.clone(),
            cwd,
            env,
            auth_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn instance() -> AgentInstance {
        AgentInstance {
            id: 7,
            root: PathBuf::from("/scratch/agent-7"),
            address: "local".to_string(),
        }
    }

    #[test]
    fn test_relative_cwd_remapped_into_instance_root() {
        let transformer = CommandTransformer::new();
        let command = LogicalCommand::shell("make", "packages/a");
        let concrete = transformer.transform(&instance(), &command, &AgentSetup::new());
        assert_eq!(concrete.cwd, Path::new("/scratch/agent-7/packages/a"));
    }

    #[test]
    fn test_absolute_cwd_kept() {
        let transformer = CommandTransformer::new();
        let command = LogicalCommand::shell("make", "/ws/packages/a");
        let concrete = transformer.transform(&instance(), &command, &AgentSetup::new());
        assert_eq!(concrete.cwd, Path::new("/ws/packages/a"));
    }

    #[test]
    fn test_setup_env_and_instance_markers_merged() {
        let transformer = CommandTransformer::new();
        let command = LogicalCommand::shell("make", "/ws/a").with_env("CI", "true");
        let setup = AgentSetup::new().with_secret("REGISTRY_TOKEN", "tok");
        let concrete = transformer.transform(&instance(), &command, &setup);

        let keys: Vec<&str> = concrete.env.iter().map(|v| v.key.as_str()).collect();
        assert!(keys.contains(&"CI"));
        assert!(keys.contains(&"REGISTRY_TOKEN"));
        assert!(keys.contains(&"GANTRY_AGENT_ID"));
        assert!(keys.contains(&"GANTRY_AGENT_ROOT"));
    }

    #[test]
    fn test_auth_file_resolved_and_exported() {
        let transformer = CommandTransformer::new();
        let command = LogicalCommand::shell("npm publish", "/ws/a");
        let setup = AgentSetup::new().with_auth_file(
            AuthFile::new(".npmrc", "//registry/:_authToken=tok").with_env_key("NPM_CONFIG_USERCONFIG"),
        );
        let concrete = transformer.transform(&instance(), &command, &setup);

        assert_eq!(concrete.auth_files.len(), 1);
        let (path, file) = &concrete.auth_files[0];
        assert_eq!(path, Path::new("/scratch/agent-7/.npmrc"));
        assert_eq!(file.contents(), "//registry/:_authToken=tok");

        let pointer = concrete
            .env
            .iter()
            .find(|v| v.key == "NPM_CONFIG_USERCONFIG")
            .unwrap();
        assert_eq!(pointer.value(), "/scratch/agent-7/.npmrc");
    }

    #[test]
    fn test_auth_file_contents_masked_in_debug() {
        let file = AuthFile::new(".npmrc", "supersecret");
        assert!(!format!("{file:?}").contains("supersecret"));
    }
}

//! Effective invocation settings
//!
//! Precedence: CLI flag (clap also reads the env fallback) over the
//! workspace `[workspace]` table over built-in defaults.

use gantry_manifest::WorkspaceConfig;
use std::env;
use std::time::Duration;

/// Default scheduler width when neither flag nor workspace config says
const DEFAULT_CONCURRENCY: usize = 4;

/// Settings after merging flags, environment, and workspace config
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub concurrency: usize,
    pub step_timeout: Option<Duration>,
    pub registry_token: Option<String>,
}

impl EffectiveConfig {
    pub fn resolve(
        workspace: &WorkspaceConfig,
        concurrency_flag: Option<usize>,
        timeout_flag: Option<u64>,
    ) -> Self {
        let concurrency = concurrency_flag
            .or(workspace.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);

        let step_timeout = timeout_flag
            .or(workspace.step_timeout_secs)
            .map(Duration::from_secs);

        let registry_token = env::var("GANTRY_REGISTRY_TOKEN").ok().filter(|t| !t.is_empty());

        Self {
            concurrency,
            step_timeout,
            registry_token,
        }
    }
}

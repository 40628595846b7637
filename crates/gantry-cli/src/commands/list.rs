//! List command (gantry list)

use anyhow::{Context, Result};
use gantry_manifest::Workspace;

/// List workspace packages with versions and directories
pub fn run() -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let workspace = Workspace::load(&cwd).context("Failed to load workspace")?;

    if workspace.is_empty() {
        println!("No packages found in {}", workspace.root.display());
        return Ok(0);
    }

    for package in workspace.packages.values() {
        let rel = package
            .dir
            .strip_prefix(&workspace.root)
            .unwrap_or(&package.dir);
        println!("{} v{} ({})", package.name, package.version, rel.display());
    }

    Ok(0)
}

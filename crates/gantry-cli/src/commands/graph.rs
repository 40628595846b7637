//! Graph command (gantry graph)

use anyhow::{Context, Result};
use clap::ValueEnum;
use gantry_graph::PackageGraph;
use gantry_manifest::Workspace;
use serde_json::json;
use std::collections::BTreeSet;

/// Output format for the graph command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Print the resolved dependency graph and topological build order
pub fn run(format: Format) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let workspace = Workspace::load(&cwd).context("Failed to load workspace")?;
    let graph = PackageGraph::build(workspace.packages.clone())
        .context("Failed to resolve dependency graph")?;

    let all: BTreeSet<String> = graph.names().cloned().collect();
    let order = graph.topological_order(&all);

    match format {
        Format::Text => {
            for name in graph.names() {
                let package = graph.package(name).expect("name from graph");
                let deps = graph.dependencies_of(name);
                if deps.is_empty() {
                    println!("{} v{}", name, package.version);
                } else {
                    println!("{} v{} -> {}", name, package.version, deps.join(", "));
                }
            }
            println!();
            println!("Build order: {}", order.join(", "));
        }
        Format::Json => {
            let packages: Vec<_> = graph
                .names()
                .map(|name| {
                    let package = graph.package(name).expect("name from graph");
                    json!({
                        "name": name,
                        "version": package.version.to_string(),
                        "dependencies": graph.dependencies_of(name),
                    })
                })
                .collect();
            let doc = json!({
                "packages": packages,
                "order": order,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }

    Ok(0)
}

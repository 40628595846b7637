//! Build closure computation
//!
//! The closure is the set of packages a single invocation will build:
//! the transitive dependents of whatever changed, unioned with the full
//! dependency chain of any explicitly requested "upto" targets.

use crate::graph::PackageGraph;
use crate::{GraphError, Result};
use std::collections::BTreeSet;

/// Why a package is part of the closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureReason {
    /// A changed package, or a transitive dependent of one
    Invalidated,
    /// Pulled in as a dependency of an upto target
    RequiredByUpto,
    /// Explicitly requested (an upto target, or default whole-workspace)
    ExplicitTarget,
}

impl ClosureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalidated => "invalidated by change",
            Self::RequiredByUpto => "required by upto target",
            Self::ExplicitTarget => "explicit target",
        }
    }
}

/// One package selected for the invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureEntry {
    pub name: String,
    pub reason: ClosureReason,
}

/// The ordered set of packages selected for one invocation
///
/// Entries are in topological order (dependencies first, ties by name), the
/// same order the scheduler uses for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildClosure {
    entries: Vec<ClosureEntry>,
}

impl BuildClosure {
    /// Assemble the closure for an invocation.
    ///
    /// `changed` seeds the invalidation closure (transitive dependents);
    /// `targets` seeds the upto closure (transitive dependencies). Both
    /// present: their union. Neither present: every package in the
    /// workspace. Unknown target names are fatal.
    pub fn assemble(
        graph: &PackageGraph,
        changed: Option<&BTreeSet<String>>,
        targets: Option<&BTreeSet<String>>,
    ) -> Result<Self> {
        let invalidated = changed
            .map(|set| invalidated_closure(graph, set))
            .unwrap_or_default();
        let required = match targets {
            Some(set) => upto_closure(graph, set)?,
            None => BTreeSet::new(),
        };

        let selected: BTreeSet<String> = if changed.is_none() && targets.is_none() {
            graph.names().cloned().collect()
        } else {
            invalidated.union(&required).cloned().collect()
        };

        let empty = BTreeSet::new();
        let explicit = targets.unwrap_or(&empty);
        let default_all = changed.is_none() && targets.is_none();

        let entries = graph
            .topological_order(&selected)
            .into_iter()
            .map(|name| {
                let reason = if default_all || explicit.contains(&name) {
                    ClosureReason::ExplicitTarget
                } else if invalidated.contains(&name) {
                    ClosureReason::Invalidated
                } else {
                    ClosureReason::RequiredByUpto
                };
                ClosureEntry { name, reason }
            })
            .collect();

        Ok(Self { entries })
    }

    /// Entries in dispatch order
    pub fn entries(&self) -> &[ClosureEntry] {
        &self.entries
    }

    /// Package names in dispatch order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Whether a package is part of the closure
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Why a package is in the closure
    pub fn reason(&self, name: &str) -> Option<ClosureReason> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.reason)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Transitive-dependents closure of a changed set.
///
/// "If B changed and A depends on B, A is invalidated too." Packages in the
/// changed set that are not workspace members are ignored.
pub fn invalidated_closure(graph: &PackageGraph, changed: &BTreeSet<String>) -> BTreeSet<String> {
    graph.reachable_dependents(changed)
}

/// Transitive-dependencies closure of a target set.
///
/// Every target plus everything it transitively depends on inside the
/// workspace. Unknown target names are a fatal error.
pub fn upto_closure(graph: &PackageGraph, targets: &BTreeSet<String>) -> Result<BTreeSet<String>> {
    for target in targets {
        if graph.package(target).is_none() {
            return Err(GraphError::UnknownPackage(target.clone()));
        }
    }
    Ok(graph.reachable_dependencies(targets))
}

// src/resolver/mod.rs

//! Dependency resolution and conflict detection
//!
//! Dependencies are a fixed graph of named components supplied by the
//! catalog; there is no version constraint solving.

mod conflict;
mod graph;

pub use conflict::{detect_conflicts, ComponentConflict, ConflictKind, ConflictSeverity};
pub use graph::{normalize_cycle, DependencyGraph, UnresolvedDependency};

use crate::error::Result;
use std::collections::HashMap;

/// All distinct cycles in a component -> dependencies map
pub fn detect_circular_dependencies(map: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
    DependencyGraph::from_map(map).detect_cycles()
}

/// Installation order, dependencies first
pub fn resolve_order(map: &HashMap<String, Vec<String>>) -> Result<Vec<String>> {
    DependencyGraph::from_map(map).topological_sort()
}

/// Components grouped into parallel install levels
pub fn parallel_levels(map: &HashMap<String, Vec<String>>) -> Result<Vec<Vec<String>>> {
    DependencyGraph::from_map(map).levels()
}

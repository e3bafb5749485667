// src/resolver/graph.rs

//! Dependency graph data structures and algorithms
//!
//! Provides graph construction, cycle detection, topological sorting and
//! grouping into parallel install levels. Edges point from a component to
//! the components it depends on.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::warn;

/// A dependency that points outside the requested set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub component: String,
    pub dependency: String,
}

/// Dependency graph restricted to a requested set of components
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Component -> direct dependencies inside the graph
    edges: BTreeMap<String, Vec<String>>,
    /// Component -> components depending on it
    reverse_edges: BTreeMap<String, Vec<String>>,
    unresolved: Vec<UnresolvedDependency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a component -> dependency-list map.
    ///
    /// The map's keys are the requested set; dependencies naming anything
    /// else are recorded as unresolved and logged, not treated as errors.
    pub fn from_map(map: &HashMap<String, Vec<String>>) -> Self {
        let mut graph = Self::new();
        for name in map.keys() {
            graph.edges.entry(name.clone()).or_default();
            graph.reverse_edges.entry(name.clone()).or_default();
        }

        let mut names: Vec<&String> = map.keys().collect();
        names.sort();

        for name in names {
            let mut seen = BTreeSet::new();
            for dep in &map[name] {
                if !seen.insert(dep) {
                    continue;
                }
                if map.contains_key(dep) {
                    graph.add_edge(name, dep);
                } else {
                    warn!(
                        "Dependency '{}' of '{}' is not part of this request; ignoring",
                        dep, name
                    );
                    graph.unresolved.push(UnresolvedDependency {
                        component: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges.entry(from.to_string()).or_default().push(to.to_string());
        self.edges.entry(to.to_string()).or_default();
        self.reverse_edges
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
        self.reverse_edges.entry(from.to_string()).or_default();
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Direct dependencies of `name` inside the graph
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Components that directly depend on `name`
    pub fn dependents(&self, name: &str) -> &[String] {
        self.reverse_edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    /// Find every elementary cycle in the graph.
    ///
    /// Each cycle is searched for from its lexicographically smallest member,
    /// only walking through larger nodes, so cycles that share nodes are
    /// still reported separately and each one exactly once, already rotated.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut found = BTreeSet::new();

        for root in self.edges.keys() {
            let mut path = vec![root.clone()];
            self.dfs_cycles(root, root, &mut path, &mut found);
        }

        found.into_iter().collect()
    }

    fn dfs_cycles(
        &self,
        root: &str,
        name: &str,
        path: &mut Vec<String>,
        found: &mut BTreeSet<Vec<String>>,
    ) {
        for dep in self.dependencies(name) {
            if dep == root {
                found.insert(normalize_cycle(path));
            } else if dep.as_str() > root && !path.contains(dep) {
                path.push(dep.clone());
                self.dfs_cycles(root, dep, path, found);
                path.pop();
            }
        }
    }

    /// Installation order (dependencies before dependents) via Kahn's algorithm
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.detect_cycles().into_iter().next() {
            return Err(Error::CircularDependency { cycle });
        }

        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());

            let mut ready = Vec::new();
            for dependent in self.dependents(name) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(dependent.as_str());
                    }
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        // A cycle the DFS somehow missed still leaves nodes unprocessed
        if order.len() != self.edges.len() {
            let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            let cycle = self
                .edges
                .keys()
                .filter(|n| !placed.contains(n.as_str()))
                .cloned()
                .collect();
            return Err(Error::CircularDependency { cycle });
        }

        Ok(order)
    }

    /// Group components into levels.
    ///
    /// Level 0 holds components with no dependencies; level `k` holds those
    /// whose deepest dependency sits in level `k - 1`. Members of one level
    /// never depend on each other.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let order = self.topological_sort()?;
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for name in &order {
            let level = self
                .dependencies(name)
                .iter()
                .filter_map(|d| level_of.get(d.as_str()))
                .max()
                .map(|&l| l + 1)
                .unwrap_or(0);

            level_of.insert(name.as_str(), level);
            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(name.clone());
        }

        for level in &mut levels {
            level.sort();
        }
        Ok(levels)
    }
}

/// Rotate a cycle so it starts at its smallest member
pub fn normalize_cycle(cycle: &[String]) -> Vec<String> {
    let Some(start) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    else {
        return Vec::new();
    };
    cycle[start..].iter().chain(&cycle[..start]).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_simple_chain_order() {
        let graph = DependencyGraph::from_map(&map(&[("A", &["B"]), ("B", &["C"]), ("C", &[])]));
        assert_eq!(graph.topological_sort().unwrap(), names(&["C", "B", "A"]));
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = DependencyGraph::from_map(&map(&[("A", &["B"]), ("B", &["A"])]));

        assert_eq!(graph.detect_cycles(), vec![names(&["A", "B"])]);
        match graph.topological_sort() {
            Err(Error::CircularDependency { cycle }) => assert_eq!(cycle, names(&["A", "B"])),
            other => panic!("Expected circular dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_three_node_cycle_rotation_invariant() {
        let graph = DependencyGraph::from_map(&map(&[
            ("C", &["A"]),
            ("A", &["B"]),
            ("B", &["C"]),
            ("D", &[]),
        ]));

        let cycles = graph.detect_cycles();
        assert_eq!(cycles, vec![names(&["A", "B", "C"])]);
    }

    #[test]
    fn test_multiple_distinct_cycles() {
        let graph = DependencyGraph::from_map(&map(&[
            ("a", &["b"]),
            ("b", &["a"]),
            ("x", &["y"]),
            ("y", &["z"]),
            ("z", &["x"]),
        ]));

        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&names(&["a", "b"])));
        assert!(cycles.contains(&names(&["x", "y", "z"])));
    }

    #[test]
    fn test_order_respects_dependencies() {
        let graph = DependencyGraph::from_map(&map(&[
            ("app", &["ui", "api"]),
            ("ui", &["common", "theme"]),
            ("api", &["common", "db"]),
            ("db", &["config"]),
            ("theme", &["config"]),
            ("common", &["utils"]),
            ("config", &[]),
            ("utils", &[]),
        ]));

        let order = graph.topological_sort().unwrap();
        assert_eq!(order.len(), 8);

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        for name in graph.components() {
            for dep in graph.dependencies(name) {
                assert!(position[dep.as_str()] < position[name], "{} before {}", dep, name);
            }
        }
    }

    #[test]
    fn test_levels_diamond() {
        let graph = DependencyGraph::from_map(&map(&[
            ("app", &["lib1", "lib2"]),
            ("lib1", &["base"]),
            ("lib2", &["base"]),
            ("base", &[]),
        ]));

        let levels = graph.levels().unwrap();
        assert_eq!(
            levels,
            vec![names(&["base"]), names(&["lib1", "lib2"]), names(&["app"])]
        );
    }

    #[test]
    fn test_level_uses_deepest_dependency() {
        let graph = DependencyGraph::from_map(&map(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
        ]));

        assert_eq!(
            graph.levels().unwrap(),
            vec![names(&["a"]), names(&["b"]), names(&["c"])]
        );
    }

    #[test]
    fn test_unresolved_dependencies_are_ignored() {
        let graph = DependencyGraph::from_map(&map(&[("poetry", &["python", "git"]), ("python", &[])]));

        assert_eq!(graph.unresolved().len(), 1);
        assert_eq!(graph.unresolved()[0].dependency, "git");
        assert_eq!(graph.topological_sort().unwrap(), names(&["python", "poetry"]));
    }

    #[test]
    fn test_cycles_sharing_nodes_reported_separately() {
        let graph = DependencyGraph::from_map(&map(&[
            ("A", &["B", "C"]),
            ("B", &["C"]),
            ("C", &["A"]),
        ]));

        assert_eq!(
            graph.detect_cycles(),
            vec![names(&["A", "B", "C"]), names(&["A", "C"])]
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = DependencyGraph::from_map(&map(&[("A", &["A", "B"]), ("B", &[])]));

        assert_eq!(graph.detect_cycles(), vec![names(&["A"])]);
    }

    #[test]
    fn test_normalize_cycle() {
        assert_eq!(normalize_cycle(&names(&["c", "a", "b"])), names(&["a", "b", "c"]));
        assert!(normalize_cycle(&[]).is_empty());
    }
}

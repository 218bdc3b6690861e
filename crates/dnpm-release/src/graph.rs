//! Dependency graph management using `petgraph`.
//!
//! Nodes are package ids, edges are "requires" relations labelled with the
//! selector the dependent asked for. The graph resolves an install order
//! (dependencies first) and rejects cycles with the offending chain.

use std::collections::HashMap;

use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{PackageId, VersionSelector};
use petgraph::Direction;
use petgraph::graph::NodeIndex;

/// A dependency graph of packages.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Internal petgraph representation.
    graph: petgraph::Graph<PackageId, VersionSelector>,
    nodes: HashMap<PackageId, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
            nodes: HashMap::new(),
        }
    }

    /// Adds a package node, returning the existing node if already present.
    pub fn add_package(&mut self, id: &PackageId) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        let _ = self.nodes.insert(id.clone(), idx);
        idx
    }

    /// Adds a dependency edge: `dependent` requires `dependency` at
    /// `selector`.
    ///
    /// The graph edge points from `dependency` to `dependent`
    /// so that topological sort yields dependencies first.
    pub fn add_dependency(
        &mut self,
        dependent: &PackageId,
        dependency: &PackageId,
        selector: VersionSelector,
    ) {
        let from = self.add_package(dependency);
        let to = self.add_package(dependent);
        let _ = self.graph.add_edge(from, to, selector);
    }

    /// Number of packages in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns the install order of the packages.
    ///
    /// Dependencies appear before the packages that depend on them.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::CyclicDependency` with the offending chain if the
    /// graph contains a cycle.
    pub fn resolve_order(&self) -> Result<Vec<PackageId>> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(indices) => Ok(indices
                .iter()
                .filter_map(|&idx| self.graph.node_weight(idx).cloned())
                .collect()),
            Err(cycle) => Err(DnpmError::CyclicDependency {
                chain: self.cycle_through(cycle.node_id()),
            }),
        }
    }

    /// Walks "requires" edges from `start` until it comes back to it.
    fn cycle_through(&self, start: NodeIndex) -> Vec<String> {
        let mut path = vec![start];
        let mut visited = vec![start];
        if !self.walk_back_to(start, start, &mut path, &mut visited) {
            path.truncate(1);
        }
        path.iter()
            .filter_map(|&idx| self.graph.node_weight(idx).map(ToString::to_string))
            .collect()
    }

    fn walk_back_to(
        &self,
        target: NodeIndex,
        node: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut Vec<NodeIndex>,
    ) -> bool {
        // Incoming edges come from the packages `node` requires.
        for next in self.graph.neighbors_directed(node, Direction::Incoming) {
            if next == target {
                path.push(next);
                return true;
            }
            if visited.contains(&next) {
                continue;
            }
            visited.push(next);
            path.push(next);
            if self.walk_back_to(target, next, path, visited) {
                return true;
            }
            let _ = path.pop();
        }
        false
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

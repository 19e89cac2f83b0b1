//! Package dependency graph and closure resolution.

use std::collections::BTreeSet;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use rustc_hash::FxHashMap;

/// Declared `requires(A, B)` relation between packages.
///
/// Edges go from the requiring package to the package it requires.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_indices: FxHashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from per-package lists of direct dependencies.
    pub fn from_declarations<I, P, D>(declarations: I) -> Self
    where
        I: IntoIterator<Item = (P, D)>,
        P: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut graph = Self::new();
        for (package, dependencies) in declarations {
            let package = package.into();
            graph.add_package(&package);
            for dependency in dependencies {
                graph.add_requirement(&package, &dependency.into());
            }
        }
        graph
    }

    /// Register a package with no dependencies (idempotent).
    pub fn add_package(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.node_indices.insert(name.to_string(), idx);
        idx
    }

    /// Record that `package` directly requires `dependency`.
    pub fn add_requirement(&mut self, package: &str, dependency: &str) {
        let from = self.add_package(package);
        let to = self.add_package(dependency);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_indices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Packages `name` directly requires.
    pub fn direct_requirements(&self, name: &str) -> BTreeSet<String> {
        self.node_indices
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors(idx)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every package that directly or indirectly requires `root`.
    ///
    /// `root` itself is never part of the result, even on a cycle. Unknown
    /// packages have no dependents.
    pub fn dependents(&self, root: &str) -> BTreeSet<String> {
        let Some(&start) = self.node_indices.get(root) else {
            return BTreeSet::new();
        };

        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut found = BTreeSet::new();
        while let Some(idx) = bfs.next(reversed) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Every package `root` directly or indirectly requires.
    pub fn requirements(&self, root: &str) -> BTreeSet<String> {
        let Some(&start) = self.node_indices.get(root) else {
            return BTreeSet::new();
        };

        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = BTreeSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }
}

/// Computes dependency closures, degrading gracefully when the host has no
/// dependency manager.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    graph: Option<DependencyGraph>,
    warn_when_missing: bool,
}

impl DependencyResolver {
    pub fn new(graph: Option<DependencyGraph>) -> Self {
        Self {
            graph,
            warn_when_missing: true,
        }
    }

    /// Whether to log a warning when no dependency graph is available.
    pub fn with_missing_warning(mut self, enabled: bool) -> Self {
        self.warn_when_missing = enabled;
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.graph.is_none()
    }

    /// Dependents of `root`, excluding `root` itself.
    ///
    /// Without a dependency manager this is empty, i.e. the closure is just
    /// the package the caller already includes.
    pub fn dependents(&self, root: &str) -> BTreeSet<String> {
        match &self.graph {
            Some(graph) => graph.dependents(root),
            None => BTreeSet::new(),
        }
    }

    /// Dependents of every package in `roots`, minus the roots themselves.
    pub fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let roots: Vec<&str> = roots.into_iter().collect();
        if self.graph.is_none() && self.warn_when_missing {
            tracing::warn!(
                "no dependency manager available; only reloading {}",
                roots.join(", ")
            );
        }

        let mut dependents = BTreeSet::new();
        for root in &roots {
            dependents.extend(self.dependents(root));
        }
        for root in &roots {
            dependents.remove(*root);
        }
        dependents
    }
}

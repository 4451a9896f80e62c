//! Dependency graph between scope files.
//!
//! Each scope file is a node; an edge `a -> b` means the scope in `a` lists
//! the scope in `b` under `dependencies`. Dependencies are resolved by `path`
//! first (relative to the declaring file's directory) and by scope name
//! otherwise.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use petgraph::algo::tarjan_scc;
use petgraph::prelude::*;
use tower_lsp::lsp_types::Url;

use super::IndexedFile;

const SCOPE_FILE_NAMES: &[&str] = &["scope.yaml", "scope.yml", "rhema.yaml", "rhema.yml"];

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<Url, ()>,
    nodes: HashMap<Url, NodeIndex>,
}

/// Resolves `.` and `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The scope file a dependency `path` points at, if it is indexed.
pub(crate) fn resolve_path<'a>(
    from: &Path,
    relative: &str,
    by_path: &HashMap<PathBuf, &'a Url>,
) -> Option<&'a Url> {
    let base = from.parent()?;
    let target = normalize(&base.join(relative));
    if let Some(uri) = by_path.get(&target) {
        return Some(uri);
    }
    SCOPE_FILE_NAMES
        .iter()
        .find_map(|name| by_path.get(&target.join(name)).copied())
}

impl DependencyGraph {
    pub fn build<'a>(files: impl IntoIterator<Item = &'a IndexedFile>) -> DependencyGraph {
        let files: Vec<&IndexedFile> = files.into_iter().filter(|f| f.is_scope()).collect();
        let mut graph = DependencyGraph::default();

        let mut by_name: HashMap<&str, &Url> = HashMap::new();
        let mut by_path: HashMap<PathBuf, &Url> = HashMap::new();
        // Sorted so the first declaration of a duplicated name wins deterministically.
        let mut ordered = files.clone();
        ordered.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
        for file in &ordered {
            graph.add_node(&file.uri);
            by_path.insert(normalize(&file.path), &file.uri);
            if let Some(name) = &file.scope_name {
                by_name.entry(name.as_str()).or_insert(&file.uri);
            }
        }

        for file in &ordered {
            for dependency in &file.dependencies {
                let target = dependency
                    .path
                    .as_deref()
                    .and_then(|relative| resolve_path(&file.path, relative, &by_path))
                    .or_else(|| by_name.get(dependency.name.as_str()).copied());
                if let Some(target) = target {
                    if *target != file.uri {
                        graph.add_edge(&file.uri, target);
                    }
                }
            }
        }
        graph
    }

    fn add_node(&mut self, uri: &Url) -> NodeIndex {
        if let Some(idx) = self.nodes.get(uri) {
            return *idx;
        }
        let idx = self.graph.add_node(uri.clone());
        self.nodes.insert(uri.clone(), idx);
        idx
    }

    fn add_edge(&mut self, from: &Url, to: &Url) {
        let a = self.add_node(from);
        let b = self.add_node(to);
        self.graph.update_edge(a, b, ());
    }

    fn neighbors(&self, uri: &Url, direction: Direction) -> Vec<Url> {
        let Some(idx) = self.nodes.get(uri) else {
            return Vec::new();
        };
        let mut uris: Vec<Url> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        uris.sort();
        uris.dedup();
        uris
    }

    pub fn dependencies(&self, uri: &Url) -> Vec<Url> {
        self.neighbors(uri, Direction::Outgoing)
    }

    pub fn dependents(&self, uri: &Url) -> Vec<Url> {
        self.neighbors(uri, Direction::Incoming)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Strongly connected components that form a cycle, each sorted.
    pub fn cycles(&self) -> Vec<Vec<Url>> {
        let mut cycles: Vec<Vec<Url>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|n| self.graph.contains_edge(*n, *n))
            })
            .map(|component| {
                let mut uris: Vec<Url> = component.into_iter().map(|n| self.graph[n].clone()).collect();
                uris.sort();
                uris
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// The other members of the cycle through `uri`, in the order the edges
    /// visit them starting from `uri`.
    pub fn cycle_through(&self, uri: &Url) -> Vec<Url> {
        let Some(&start) = self.nodes.get(uri) else {
            return Vec::new();
        };
        let Some(component) = tarjan_scc(&self.graph)
            .into_iter()
            .find(|component| component.contains(&start))
        else {
            return Vec::new();
        };
        if component.len() < 2 {
            return Vec::new();
        }

        let members: HashSet<NodeIndex> = component.into_iter().collect();
        let mut order = Vec::new();
        let mut visited = BTreeSet::from([start.index()]);
        let mut current = start;
        loop {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors(current)
                .filter(|n| members.contains(n) && !visited.contains(&n.index()))
                .collect();
            next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
            let Some(&step) = next.first() else {
                break;
            };
            visited.insert(step.index());
            order.push(self.graph[step].clone());
            current = step;
        }
        // Members not reached along the walk still belong to the cycle.
        let mut rest: Vec<Url> = members
            .into_iter()
            .filter(|n| !visited.contains(&n.index()))
            .map(|n| self.graph[n].clone())
            .collect();
        rest.sort();
        order.extend(rest);
        order
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{snapshot_of, test_uri};

    #[test]
    fn test_edges_resolve_by_name_and_path() {
        let snapshot = snapshot_of(&[
            ("core/scope.yaml", "scope:\n  name: core\n"),
            (
                "api/scope.yaml",
                "scope:\n  name: api\n  dependencies:\n    - name: renamed\n      path: ../core\n",
            ),
            ("web/scope.yaml", "scope:\n  name: web\n  dependencies: [api, core]\n"),
        ]);
        assert_eq!(
            snapshot.get_dependencies(&test_uri("api/scope.yaml")),
            vec![test_uri("core/scope.yaml")]
        );
        assert_eq!(
            snapshot.get_dependents(&test_uri("core/scope.yaml")),
            vec![test_uri("api/scope.yaml"), test_uri("web/scope.yaml")]
        );
        assert!(snapshot.dependency_cycles().is_empty());
    }

    #[test]
    fn test_cycles_and_walk_order() {
        let snapshot = snapshot_of(&[
            ("a/scope.yaml", "scope:\n  name: a\n  dependencies: [b]\n"),
            ("b/scope.yaml", "scope:\n  name: b\n  dependencies: [c]\n"),
            ("c/scope.yaml", "scope:\n  name: c\n  dependencies: [a]\n"),
            ("d/scope.yaml", "scope:\n  name: d\n  dependencies: [a]\n"),
        ]);
        assert_eq!(
            snapshot.dependency_cycles(),
            vec![vec![
                test_uri("a/scope.yaml"),
                test_uri("b/scope.yaml"),
                test_uri("c/scope.yaml"),
            ]]
        );
        let graph = &snapshot.graph;
        assert_eq!(
            graph.cycle_through(&test_uri("b/scope.yaml")),
            vec![test_uri("c/scope.yaml"), test_uri("a/scope.yaml")]
        );
        assert!(graph.cycle_through(&test_uri("d/scope.yaml")).is_empty());
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_self_dependency_is_not_an_edge() {
        let snapshot = snapshot_of(&[("a/scope.yaml", "scope:\n  name: a\n  dependencies: [a]\n")]);
        assert_eq!(snapshot.graph.edge_count(), 0);
        assert!(snapshot.dependency_cycles().is_empty());
    }

    #[test]
    fn test_normalize_resolves_parent_components() {
        let path = std::path::Path::new("/ws/api/../core/./scope.yaml");
        assert_eq!(super::normalize(path), std::path::PathBuf::from("/ws/core/scope.yaml"));
    }
}

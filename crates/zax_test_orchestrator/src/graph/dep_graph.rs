//! Dependency graph using petgraph.
//!
//! Stores module dependencies as a directed graph where edge A→B means
//! "A imports B". Importers of a module are its incoming neighbours.

use super::resolver::PathResolver;
use super::{ModuleGraph, ResolvedId};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Maximum number of nodes before the graph stops growing.
const MAX_GRAPH_NODES: usize = 10_000;

/// A node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphNode {
    /// A module backed by a file on disk.
    Module(PathBuf),
    /// A module with no file behind it (`virtual:` ids, injected helpers).
    Virtual(String),
}

impl GraphNode {
    pub fn file(&self) -> Option<&Path> {
        match self {
            GraphNode::Module(path) => Some(path),
            GraphNode::Virtual(_) => None,
        }
    }
}

/// Dependency graph storing module import relationships.
pub struct DepGraph {
    graph: StableDiGraph<GraphNode, ()>,
    node_to_idx: HashMap<GraphNode, NodeIndex>,
    invalidated: HashSet<PathBuf>,
    resolver: Option<PathResolver>,
    overflow: bool,
}

impl Default for DepGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DepGraph {
    /// Create a new empty dependency graph.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_to_idx: HashMap::new(),
            invalidated: HashSet::new(),
            resolver: None,
            overflow: false,
        }
    }

    /// Create a graph that can answer `resolve_id` through `resolver`.
    pub fn with_resolver(resolver: PathResolver) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::new()
        }
    }

    /// Add a file to the graph. Returns the node index.
    /// If the graph exceeds `MAX_GRAPH_NODES`, sets overflow flag and returns None.
    pub fn add_file(&mut self, path: PathBuf) -> Option<NodeIndex> {
        self.add_node(GraphNode::Module(path))
    }

    pub fn add_virtual(&mut self, id: impl Into<String>) -> Option<NodeIndex> {
        self.add_node(GraphNode::Virtual(id.into()))
    }

    fn add_node(&mut self, node: GraphNode) -> Option<NodeIndex> {
        if let Some(&idx) = self.node_to_idx.get(&node) {
            return Some(idx);
        }

        if self.graph.node_count() >= MAX_GRAPH_NODES {
            if !self.overflow {
                tracing::warn!(
                    target: "affected",
                    max = MAX_GRAPH_NODES,
                    "graph exceeded node limit, falling back to coarse invalidation"
                );
                self.overflow = true;
            }
            return None;
        }

        let idx = self.graph.add_node(node.clone());
        self.node_to_idx.insert(node, idx);
        Some(idx)
    }

    /// Update outgoing edges for a file atomically.
    /// Removes all existing outgoing edges and adds new ones.
    pub fn update_edges(&mut self, from: &Path, imports: &[PathBuf]) {
        let targets: Vec<GraphNode> = imports.iter().cloned().map(GraphNode::Module).collect();
        self.update_node_edges(&GraphNode::Module(from.to_path_buf()), &targets);
    }

    /// Like [`DepGraph::update_edges`] for arbitrary nodes.
    pub fn update_node_edges(&mut self, from: &GraphNode, imports: &[GraphNode]) {
        let Some(&from_idx) = self.node_to_idx.get(from) else {
            return;
        };

        let edges_to_remove: Vec<_> = self
            .graph
            .edges_directed(from_idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();

        for edge_id in edges_to_remove {
            self.graph.remove_edge(edge_id);
        }

        for import in imports {
            if let Some(&to_idx) = self.node_to_idx.get(import) {
                self.graph.add_edge(from_idx, to_idx, ());
            }
        }
    }

    /// Remove a file and all its connected edges.
    pub fn remove_file(&mut self, path: &Path) {
        if let Some(idx) = self.node_to_idx.remove(&GraphNode::Module(path.to_path_buf())) {
            self.graph.remove_node(idx);
        }
        self.invalidated.remove(path);
    }

    /// Get current node count.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get current edge count.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl ModuleGraph for DepGraph {
    fn contains(&self, file: &Path) -> bool {
        self.node_to_idx
            .contains_key(&GraphNode::Module(file.to_path_buf()))
    }

    fn importers_of(&self, file: &Path) -> Vec<GraphNode> {
        let Some(&idx) = self.node_to_idx.get(&GraphNode::Module(file.to_path_buf())) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|e| self.graph.node_weight(e.source()).cloned())
            .collect()
    }

    fn invalidate_module(&mut self, file: &Path) {
        if self.contains(file) {
            self.invalidated.insert(file.to_path_buf());
        }
    }

    fn take_invalidated(&mut self) -> Vec<PathBuf> {
        let mut drained: Vec<PathBuf> = self.invalidated.drain().collect();
        drained.sort();
        drained
    }

    fn resolve_id(&self, id: &str, importer: &Path) -> Option<ResolvedId> {
        let resolver = self.resolver.as_ref()?;
        let resolved = resolver.resolve_any(importer, id)?;
        let external = !resolver.is_internal(&resolved);
        Some(ResolvedId {
            id: resolved,
            external,
        })
    }

    fn is_overflow(&self) -> bool {
        self.overflow
    }
}

/// Thread-safe wrapper around `DepGraph`.
pub type SharedDepGraph = Arc<RwLock<DepGraph>>;

/// Create a new shared dependency graph.
pub fn new_shared_graph() -> SharedDepGraph {
    Arc::new(RwLock::new(DepGraph::new()))
}

/// Create a shared graph that resolves imports relative to `workspace_root`.
pub fn new_workspace_graph(workspace_root: PathBuf) -> SharedDepGraph {
    Arc::new(RwLock::new(DepGraph::with_resolver(PathResolver::new(
        workspace_root,
    ))))
}

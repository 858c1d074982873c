//! Module graph used by watch mode.
//!
//! The resolver only needs a handful of questions answered about the module
//! graph, captured by [`ModuleGraph`]. [`DepGraph`] answers them from static
//! import parsing; anything else that knows importer edges can stand in.

pub mod builder;
pub mod dep_graph;
pub mod parser;
pub mod resolver;

pub use builder::{build_workspace_graph, update_graph_for_file};
pub use dep_graph::{new_shared_graph, new_workspace_graph, DepGraph, GraphNode, SharedDepGraph};
pub use resolver::PathResolver;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Result of resolving an import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: PathBuf,
    /// Resolved outside the workspace (dependencies, absolute paths).
    pub external: bool,
}

/// Importer edges and cache invalidation of a loaded module graph.
pub trait ModuleGraph: Send + Sync {
    /// Whether `file` is loaded as a module.
    fn contains(&self, file: &Path) -> bool;

    /// Modules that import `file` directly.
    fn importers_of(&self, file: &Path) -> Vec<GraphNode>;

    /// Marks `file` stale so its next load is not served from cache.
    fn invalidate_module(&mut self, file: &Path);

    /// Drains the modules marked stale since the last call.
    fn take_invalidated(&mut self) -> Vec<PathBuf>;

    fn resolve_id(&self, id: &str, importer: &Path) -> Option<ResolvedId>;

    /// Whether the graph stopped tracking new files and can no longer be
    /// trusted to be complete.
    fn is_overflow(&self) -> bool {
        false
    }
}

/// A module graph shared between projects and the watcher.
pub type SharedModuleGraph = Arc<RwLock<dyn ModuleGraph>>;

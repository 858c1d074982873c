//! Populating the dependency graph from the workspace.

use super::dep_graph::SharedDepGraph;
use super::parser::{parse_imports, truncate_path};
use super::resolver::truncate_str;
use super::{ModuleGraph, ResolvedId};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::time::{Duration, Instant};

const GRAPH_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of a full graph build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub files: usize,
    pub nodes: usize,
    pub edges: usize,
}

/// Walks the workspace and records the import edges of every module,
/// resolving specifiers through the graph's own resolver.
///
/// Blocking; run it on a blocking thread. Stops early when the graph
/// overflows or the build exceeds its time budget.
pub fn build_workspace_graph(workspace_root: &Path, graph: &SharedDepGraph) -> GraphStats {
    let start = Instant::now();
    tracing::info!(target: "affected", root = %workspace_root.display(), "starting graph build");

    let mut files = 0;
    let walker = WalkBuilder::new(workspace_root)
        .hidden(false)
        .git_ignore(true)
        .build();

    for entry in walker.flatten() {
        if !is_module_file(entry.path()) {
            continue;
        }
        let Ok(path) = entry.path().canonicalize() else {
            continue;
        };

        if !index_module(graph, path) {
            tracing::warn!(target: "affected", "graph overflow during init");
            break;
        }
        files += 1;

        if start.elapsed() > GRAPH_INIT_TIMEOUT {
            tracing::warn!(
                target: "affected",
                timeout_secs = GRAPH_INIT_TIMEOUT.as_secs(),
                "graph init timeout"
            );
            break;
        }
    }

    let (nodes, edges) = {
        let g = graph.read().unwrap_or_else(PoisonError::into_inner);
        (g.node_count(), g.edge_count())
    };
    tracing::info!(
        target: "affected",
        files,
        nodes,
        edges,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "graph build complete"
    );

    GraphStats { files, nodes, edges }
}

/// Re-indexes one module after it changed on disk, or drops it when it
/// no longer exists.
pub fn update_graph_for_file(graph: &SharedDepGraph, path: &Path) {
    if !is_module_file(path) {
        return;
    }

    let Ok(path) = path.canonicalize() else {
        // Deleted files cannot be canonicalized; try the path as given.
        graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_file(path);
        return;
    };

    index_module(graph, path);
}

/// Adds `path` and replaces its outgoing edges. Returns false on overflow.
fn index_module(graph: &SharedDepGraph, path: PathBuf) -> bool {
    let imports = parse_imports(&path);
    let resolved: Vec<PathBuf> = {
        let g = graph.read().unwrap_or_else(PoisonError::into_inner);
        imports
            .iter()
            .filter_map(|import| match g.resolve_id(&import.specifier, &path) {
                Some(ResolvedId { id, external: false }) => Some(id),
                Some(ResolvedId { id, external: true }) => {
                    tracing::debug!(
                        target: "affected",
                        specifier = truncate_str(&import.specifier),
                        from = %truncate_path(&path),
                        resolved = %truncate_path(&id),
                        "import resolves outside workspace"
                    );
                    None
                }
                None => {
                    tracing::debug!(
                        target: "affected",
                        specifier = truncate_str(&import.specifier),
                        from = %truncate_path(&path),
                        "cannot resolve import"
                    );
                    None
                }
            })
            .collect()
    };

    let mut g = graph.write().unwrap_or_else(PoisonError::into_inner);
    if g.add_file(path.clone()).is_none() {
        return false;
    }
    let targets: Vec<PathBuf> = resolved
        .into_iter()
        .filter(|target| g.add_file(target.clone()).is_some())
        .collect();
    g.update_edges(&path, &targets);
    true
}

pub fn is_module_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(
        ext,
        "ts" | "tsx" | "js" | "jsx" | "mts" | "mjs" | "cts" | "cjs"
    )
}

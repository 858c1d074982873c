use std::env;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use zax_test_orchestrator::config::{compile_globs, OrchestratorConfig};
use zax_test_orchestrator::graph::{
    build_workspace_graph, new_workspace_graph, update_graph_for_file, SharedDepGraph,
};
use zax_test_orchestrator::pool::{StaticPool, WorkerPool};
use zax_test_orchestrator::project::TestProject;
use zax_test_orchestrator::store::ResultsCache;
use zax_test_orchestrator::task::TaskState;
use zax_test_orchestrator::watch::{
    start_watcher, WatchEvent, WatchEventKind, WatchScheduler, WatcherConfig,
};
use zax_test_orchestrator::{CancelReason, Orchestrator, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Watch,
    Run,
}

/// Why watch mode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Interrupted,
    Terminated,
}

fn parse_args(args: &[String]) -> Option<(PathBuf, Mode)> {
    match args {
        [_, root] => Some((PathBuf::from(root), Mode::Watch)),
        [_, root, mode] if mode == "run" => Some((PathBuf::from(root), Mode::Run)),
        [_, root, mode] if mode == "watch" => Some((PathBuf::from(root), Mode::Watch)),
        _ => None,
    }
}

async fn run(workspace_root: PathBuf, mode: Mode) -> Result<i32, Box<dyn std::error::Error>> {
    let workspace_root = workspace_root.canonicalize()?;
    let config = OrchestratorConfig::load(&workspace_root)?;
    let root = config.root.canonicalize().unwrap_or_else(|_| config.root.clone());

    // Build the module graph before the first run
    let graph = new_workspace_graph(root.clone());
    let stats = tokio::task::spawn_blocking({
        let graph = Arc::clone(&graph);
        let root = root.clone();
        move || build_workspace_graph(&root, &graph)
    })
    .await?;
    tracing::info!(
        target: "affected",
        files = stats.files,
        edges = stats.edges,
        "module graph ready"
    );

    let projects = config
        .project_configs()
        .iter()
        .map(|project| TestProject::from_config(project, &root, graph.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let cache = match ResultsCache::open(&config.cache_dir()) {
        Ok(cache) => Some(cache),
        Err(error) => {
            tracing::warn!(target: "watch", %error, "results cache disabled");
            None
        }
    };
    let ignore = compile_globs(&config.watch.ignore)?;

    let mut orchestrator = Orchestrator::new(config, projects, StaticPool::new())?
        .with_watch_mode(mode == Mode::Watch);
    if let Some(cache) = cache {
        orchestrator = orchestrator.with_cache(cache);
    }
    let orchestrator = Arc::new(orchestrator);

    let specs = orchestrator.glob_test_specifications(&[]);
    match orchestrator.group_files_by_env(&specs).await {
        Ok(groups) => {
            for (environment, files) in &groups {
                tracing::info!(target: "collect", %environment, files = files.len(), "environment");
            }
        }
        Err(error) => {
            tracing::warn!(target: "collect", %error, "cannot group files by environment");
        }
    }
    let summary = orchestrator.run_files(specs, true).await;
    report(&orchestrator, &summary);

    if mode == Mode::Run {
        return Ok(orchestrator.exit_code());
    }

    let events = start_watcher(WatcherConfig::new(root, ignore))?;
    let scheduler = WatchScheduler::new(Arc::clone(&orchestrator));
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => Shutdown::Interrupted,
            _ = sigterm.recv() => Shutdown::Terminated,
        }
    };

    if watch_loop(events, &scheduler, &graph, shutdown).await? == Shutdown::Interrupted {
        orchestrator.cancel_current_run(CancelReason::KeyboardInput).await;
    }

    Ok(orchestrator.exit_code())
}

/// Feeds watcher events to the scheduler until `shutdown` resolves. A closed
/// event channel means the watcher thread died and is an error.
async fn watch_loop<P, F>(
    mut events: mpsc::Receiver<WatchEvent>,
    scheduler: &WatchScheduler<P>,
    graph: &SharedDepGraph,
    shutdown: F,
) -> Result<Shutdown, Box<dyn std::error::Error>>
where
    P: WorkerPool,
    F: Future<Output = Shutdown>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::error!(target: "watch", "file watcher stopped");
                    return Err("file watcher stopped unexpectedly".into());
                };
                // Unlinked files are resolved against the graph as it was.
                if event.kind == WatchEventKind::Unlink {
                    scheduler.handle_event(&event);
                    refresh_graph(graph, &event.path).await;
                } else {
                    refresh_graph(graph, &event.path).await;
                    scheduler.handle_event(&event);
                }
            }
            reason = &mut shutdown => return Ok(reason),
        }
    }
}

async fn refresh_graph(graph: &SharedDepGraph, path: &Path) {
    let graph = Arc::clone(graph);
    let path = path.to_path_buf();
    if let Err(error) =
        tokio::task::spawn_blocking(move || update_graph_for_file(&graph, &path)).await
    {
        tracing::warn!(target: "affected", %error, "graph update failed");
    }
}

fn report<P: WorkerPool>(orchestrator: &Orchestrator<P>, summary: &RunSummary) {
    orchestrator.with_state(|state| {
        for file in state.get_files(Some(summary.files.as_slice())) {
            let tasks = file.all_tasks();
            let tests = tasks.iter().filter(|t| !t.is_suite()).count();
            let skipped = tasks
                .iter()
                .filter(|t| t.result.as_ref().is_some_and(|r| r.state == TaskState::Skip))
                .count();
            if let Some(error) = file.result.as_ref().and_then(|r| r.errors.first()) {
                tracing::error!(
                    target: "collect",
                    file = %file.name,
                    project = %file.project_name,
                    error = %error.message,
                    "{}",
                    error.name
                );
            } else {
                tracing::info!(
                    target: "collect",
                    file = %file.name,
                    project = %file.project_name,
                    tests,
                    skipped,
                    failed = file.has_failed()
                );
            }
        }
    });
    for error in &summary.errors {
        tracing::error!(target: "watch", error = %error.message, "{}", error.name);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some((workspace_root, mode)) = parse_args(&args) else {
        tracing::error!("usage: zax_test_orchestrator <workspace_root> [run|watch]");
        std::process::exit(2);
    };

    match run(workspace_root, mode).await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            tracing::error!(%error, "orchestrator failed");
            std::process::exit(1);
        }
    }
}

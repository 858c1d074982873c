//! Run orchestration.
//!
//! Owns the projects, the state manager and the pending watch-mode sets.
//! Runs are serialized by an async lock held for the whole run; the
//! synchronous state sits behind a std mutex that is never held across an
//! await.

use crate::config::{ConfigError, OrchestratorConfig};
use crate::env::{self, EnvError, EnvironmentGroups};
use crate::pool::{RunOptions, WorkerPool};
use crate::project::{TestProject, TestSpecification};
use crate::sequencer::sort_specs;
use crate::state::StateManager;
use crate::store::{CacheKey, FileStats, ResultsCache};
use crate::task::{File, TaskError};
use crate::watch::resolver::DependencyGraphResolver;
use crate::watch::watcher::{WatchEvent, WatchEventKind};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;

/// Why a run is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    KeyboardInput,
    TestFailure,
}

const DEFAULT_ENVIRONMENT: &str = "node";

pub type CancelListener =
    Arc<dyn Fn(CancelReason) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Held for the duration of a run.
pub type RunGuard<'a> = tokio::sync::MutexGuard<'a, ()>;

/// Outcome of one run or collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Files of the run, deduplicated, in dispatch order.
    pub files: Vec<PathBuf>,
    /// Files of the run with at least one failure.
    pub failed: Vec<PathBuf>,
    pub errors: Vec<TaskError>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn has_failed(&self) -> bool {
        !self.failed.is_empty() || !self.errors.is_empty()
    }
}

/// State shared between runs and watch events.
pub(crate) struct CoreState {
    pub(crate) projects: Vec<TestProject>,
    pub(crate) state: StateManager,
    pub(crate) watcher: DependencyGraphResolver,
    pub(crate) watched_tests: Option<BTreeSet<PathBuf>>,
    pub(crate) filename_pattern: Option<String>,
    pub(crate) name_pattern: Option<Regex>,
}

impl CoreState {
    fn specifications(&self, files: &[PathBuf]) -> Vec<TestSpecification> {
        files
            .iter()
            .flat_map(|file| {
                self.projects
                    .iter()
                    .filter(move |p| p.is_cached_test_file(file))
                    .map(move |p| p.create_specification(file.clone(), None))
            })
            .collect()
    }

    fn matches_filename_pattern(&self, file: &Path) -> bool {
        self.filename_pattern
            .as_deref()
            .is_none_or(|pattern| file.to_string_lossy().contains(pattern))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Run,
    /// A run fired by the watch scheduler.
    WatchRun,
    Collect,
}

pub struct Orchestrator<P> {
    config: OrchestratorConfig,
    pool: P,
    core: Mutex<CoreState>,
    default_name_pattern: Option<Regex>,
    run_lock: tokio::sync::Mutex<()>,
    cancelling: Arc<AtomicBool>,
    cancel_listeners: Mutex<Vec<CancelListener>>,
    exit_code: AtomicI32,
    watch_mode: bool,
    cache: Option<Mutex<ResultsCache>>,
}

impl<P: WorkerPool> Orchestrator<P> {
    pub fn new(
        config: OrchestratorConfig,
        projects: Vec<TestProject>,
        pool: P,
    ) -> Result<Self, ConfigError> {
        let watcher = DependencyGraphResolver::new(config.force_rerun_globs()?);
        let default_name_pattern = config.name_pattern()?;
        Ok(Self {
            core: Mutex::new(CoreState {
                projects,
                state: StateManager::new(),
                watcher,
                watched_tests: None,
                filename_pattern: None,
                name_pattern: default_name_pattern.clone(),
            }),
            config,
            pool,
            default_name_pattern,
            run_lock: tokio::sync::Mutex::new(()),
            cancelling: Arc::new(AtomicBool::new(false)),
            cancel_listeners: Mutex::new(Vec::new()),
            exit_code: AtomicI32::new(0),
            watch_mode: false,
            cache: None,
        })
    }

    /// Orders runs by, and records results into, `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: ResultsCache) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    /// In watch mode failing runs leave the exit code alone.
    #[must_use]
    pub fn with_watch_mode(mut self, watch_mode: bool) -> Self {
        self.watch_mode = watch_mode;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// 1 once any run outside watch mode failed or reported unhandled
    /// errors.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::SeqCst)
    }

    pub(crate) fn core(&self) -> MutexGuard<'_, CoreState> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access to the collected trees and errors.
    pub fn with_state<R>(&self, f: impl FnOnce(&StateManager) -> R) -> R {
        f(&self.core().state)
    }

    /// Globs every project and returns the specs whose path contains one of
    /// `filters` (all of them when `filters` is empty).
    pub fn glob_test_specifications(&self, filters: &[String]) -> Vec<TestSpecification> {
        let mut core = self.core();
        let mut specs = Vec::new();
        for project in &mut core.projects {
            for file in project.glob_test_files() {
                let path = file.to_string_lossy();
                if filters.is_empty() || filters.iter().any(|f| path.contains(f.as_str())) {
                    specs.push(project.create_specification(file, None));
                }
            }
        }
        specs
    }

    /// Groups `specs` by test environment. Files without a docblock get the
    /// environment their project assigns.
    pub async fn group_files_by_env(
        &self,
        specs: &[TestSpecification],
    ) -> Result<EnvironmentGroups, EnvError> {
        let fallbacks: HashMap<(String, PathBuf), String> = {
            let core = self.core();
            specs
                .iter()
                .filter_map(|spec| {
                    let project = core.projects.iter().find(|p| p.name() == spec.project_name)?;
                    Some((
                        (spec.project_name.clone(), spec.filepath.clone()),
                        project.environment_for(&spec.filepath).to_string(),
                    ))
                })
                .collect()
        };

        env::group_files_by_env(specs, |spec| {
            fallbacks
                .get(&(spec.project_name.clone(), spec.filepath.clone()))
                .cloned()
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
        })
        .await
    }

    /// Globs and runs every matching test file.
    pub async fn start(&self, filters: &[String]) -> RunSummary {
        let specs = self.glob_test_specifications(filters);
        tracing::info!(target: "watch", files = specs.len(), "initial run");
        self.run_files(specs, filters.is_empty()).await
    }

    /// Waits for the previous run, then runs `specs`.
    pub async fn run_files(
        &self,
        specs: Vec<TestSpecification>,
        all_tests_run: bool,
    ) -> RunSummary {
        let run = self.lock_run().await;
        self.dispatch(&run, specs, all_tests_run, Dispatch::Run).await
    }

    /// Collects `specs` without running them, serialized with runs.
    pub async fn collect_files(&self, specs: Vec<TestSpecification>) -> RunSummary {
        let run = self.lock_run().await;
        self.dispatch(&run, specs, false, Dispatch::Collect).await
    }

    pub(crate) async fn lock_run(&self) -> RunGuard<'_> {
        self.run_lock.lock().await
    }

    /// Reruns `specs` for the watch scheduler, which holds the run lock.
    pub(crate) async fn run_locked(
        &self,
        run: &RunGuard<'_>,
        specs: Vec<TestSpecification>,
        all_tests_run: bool,
    ) -> RunSummary {
        self.dispatch(run, specs, all_tests_run, Dispatch::WatchRun).await
    }

    async fn dispatch(
        &self,
        _run: &RunGuard<'_>,
        mut specs: Vec<TestSpecification>,
        all_tests_run: bool,
        kind: Dispatch,
    ) -> RunSummary {
        self.cancelling.store(false, Ordering::SeqCst);
        self.listeners().clear();

        let results = self.cached_results();
        sort_specs(&mut specs, &results);

        let (invalidates, options) = {
            let mut core = self.core();
            core.state.clear_errors();
            let mut invalidates = core.watcher.take_invalidates();
            for project in &core.projects {
                invalidates.extend(project.take_invalidated_modules());
            }
            let invalidates: Vec<PathBuf> = invalidates.into_iter().collect();
            let options = RunOptions {
                name_pattern: core.name_pattern.clone(),
                allow_only: self.config.allow_only,
                setup_files: self.config.setup_files.clone(),
                cancelled: Arc::clone(&self.cancelling),
            };
            (invalidates, options)
        };

        tracing::info!(
            target: "watch",
            files = specs.len(),
            invalidates = invalidates.len(),
            all_tests_run,
            "starting {}",
            match kind {
                Dispatch::Run => "run",
                Dispatch::WatchRun => "watch rerun",
                Dispatch::Collect => "collection",
            }
        );

        let result = match kind {
            Dispatch::Run | Dispatch::WatchRun => {
                self.pool.run_tests(&specs, &invalidates, &options).await
            }
            Dispatch::Collect => self.pool.collect_tests(&specs, &invalidates, &options).await,
        };

        let files = match result {
            Ok(files) => files,
            Err(error) => {
                tracing::error!(target: "watch", %error, "worker pool failed");
                self.core()
                    .state
                    .catch_error(TaskError::new("Unhandled Error", error.to_string()));
                Vec::new()
            }
        };

        if kind != Dispatch::Collect {
            self.record_results(&files);
        }

        let mut paths: Vec<PathBuf> = Vec::with_capacity(specs.len());
        for spec in &specs {
            if !paths.contains(&spec.filepath) {
                paths.push(spec.filepath.clone());
            }
        }

        let mut core = self.core();
        core.state.collect_files(files);
        let failed: Vec<PathBuf> = core
            .state
            .get_failed_filepaths()
            .into_iter()
            .filter(|p| paths.contains(p))
            .collect();
        let errors = core.state.unhandled_errors().to_vec();
        let any_failed = core.state.get_files(None).iter().any(|f| f.has_failed());
        drop(core);

        if kind == Dispatch::Run && !self.watch_mode && (any_failed || !errors.is_empty()) {
            self.exit_code.store(1, Ordering::SeqCst);
        }

        let summary = RunSummary {
            files: paths,
            failed,
            errors,
            cancelled: self.is_cancelling(),
        };
        tracing::info!(
            target: "watch",
            files = summary.files.len(),
            failed = summary.failed.len(),
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            "finished"
        );
        summary
    }

    fn cached_results(&self) -> HashMap<CacheKey, FileStats> {
        let Some(cache) = &self.cache else {
            return HashMap::new();
        };
        let loaded = cache.lock().unwrap_or_else(PoisonError::into_inner).load();
        loaded.unwrap_or_else(|error| {
            tracing::warn!(target: "watch", %error, "cannot read results cache");
            HashMap::new()
        })
    }

    fn record_results(&self, files: &[File]) {
        let Some(cache) = &self.cache else {
            return;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        let recorded = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(files, now);
        if let Err(error) = recorded {
            tracing::warn!(target: "watch", %error, "cannot write results cache");
        }
    }

    /// Reruns `files` (every known file when `None`) across the projects that
    /// own them, honoring the filename pattern.
    pub async fn rerun_files(
        &self,
        files: Option<Vec<PathBuf>>,
        trigger: Option<&str>,
        all_tests_run: bool,
        reset_name_pattern: bool,
    ) -> RunSummary {
        let specs = {
            let mut core = self.core();
            if reset_name_pattern {
                core.name_pattern = self.default_name_pattern.clone();
            }
            let mut files = files.unwrap_or_else(|| core.state.get_filepaths());
            files.retain(|f| core.matches_filename_pattern(f));
            core.specifications(&files)
        };
        tracing::info!(
            target: "watch",
            trigger = trigger.unwrap_or("manual"),
            files = specs.len(),
            "rerun"
        );
        self.run_files(specs, all_tests_run).await
    }

    pub async fn rerun_failed(&self) -> RunSummary {
        let failed = self.core().state.get_failed_filepaths();
        self.rerun_files(Some(failed), Some("rerun failed"), false, false)
            .await
    }

    /// Restricts watch-mode reruns to `files`. An empty list lifts the
    /// restriction.
    pub fn watch_tests(&self, files: Vec<PathBuf>) {
        self.core().watched_tests = if files.is_empty() {
            None
        } else {
            Some(files.into_iter().collect())
        };
    }

    /// Switches the test name pattern and reruns the files that may contain
    /// matching tests: files never collected, and files whose own name or
    /// any task name matches. An empty pattern clears both patterns.
    pub async fn change_name_pattern(
        &self,
        pattern: &str,
        files: Option<Vec<PathBuf>>,
    ) -> Result<RunSummary, ConfigError> {
        let name_pattern = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        let files = {
            let mut core = self.core();
            if pattern.is_empty() {
                core.filename_pattern = None;
            }
            let files = files.unwrap_or_else(|| core.state.get_filepaths());
            let files = match &name_pattern {
                Some(re) => files
                    .into_iter()
                    .filter(|path| {
                        let trees = core.state.get_files(Some(std::slice::from_ref(path)));
                        trees.is_empty()
                            || trees.iter().any(|file| {
                                re.is_match(&file.name)
                                    || file.all_tasks().iter().any(|t| re.is_match(&t.name))
                            })
                    })
                    .collect(),
                None => files,
            };
            core.name_pattern = name_pattern;
            files
        };

        Ok(self
            .rerun_files(Some(files), Some("change name pattern"), pattern.is_empty(), false)
            .await)
    }

    /// Switches the filename pattern and reruns `files` (every known file by
    /// default) that contain it.
    pub async fn change_filename_pattern(
        &self,
        pattern: &str,
        files: Option<Vec<PathBuf>>,
    ) -> RunSummary {
        self.core().filename_pattern = (!pattern.is_empty()).then(|| pattern.to_string());
        let trigger = if pattern.is_empty() {
            "reset filename pattern"
        } else {
            "change filename pattern"
        };
        self.rerun_files(files, Some(trigger), pattern.is_empty(), false)
            .await
    }

    /// Registers a listener for the current run. Listeners are dropped when
    /// the next run starts.
    pub fn on_cancel<F, Fut>(&self, listener: F)
    where
        F: Fn(CancelReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: CancelListener = Arc::new(
            move |reason: CancelReason| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(listener(reason))
            },
        );
        self.listeners().push(listener);
    }

    /// Flags the current run as cancelled and waits for every listener.
    pub async fn cancel_current_run(&self, reason: CancelReason) {
        self.cancelling.store(true, Ordering::SeqCst);
        let listeners = std::mem::take(&mut *self.listeners());
        tracing::info!(target: "watch", ?reason, listeners = listeners.len(), "cancelling run");

        let mut set = JoinSet::new();
        for listener in listeners {
            set.spawn(listener(reason));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(error) = joined {
                tracing::warn!(target: "watch", %error, "cancel listener failed");
            }
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<CancelListener>> {
        self.cancel_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds one watcher event into the resolver. Returns whether a rerun
    /// should be scheduled.
    pub fn handle_watch_event(&self, event: &WatchEvent) -> bool {
        let mut core = self.core();
        let CoreState {
            projects,
            state,
            watcher,
            ..
        } = &mut *core;

        match event.kind {
            WatchEventKind::Change => watcher.on_change(&event.path, projects, state),
            WatchEventKind::Add => watcher.on_add(&event.path, projects, state),
            WatchEventKind::Unlink => {
                if watcher.on_unlink(&event.path, projects, state) {
                    self.forget_results(&event.path);
                }
                false
            }
        }
    }

    fn forget_results(&self, path: &Path) {
        let Some(cache) = &self.cache else {
            return;
        };
        let removed = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if let Err(error) = removed {
            tracing::warn!(target: "watch", %error, "cannot update results cache");
        }
    }

    /// Takes the pending changed tests that pass the watch restriction and
    /// the filename pattern, as specifications.
    ///
    /// When every pending test is filtered out both sets are kept for a
    /// later batch.
    pub(crate) fn take_pending_specs(&self) -> Option<Vec<TestSpecification>> {
        let mut core = self.core();

        if core.watcher.changed_tests().is_empty() {
            return None;
        }

        let files: Vec<PathBuf> = core
            .watcher
            .changed_tests()
            .iter()
            .filter(|f| core.watched_tests.as_ref().is_none_or(|w| w.contains(*f)))
            .filter(|f| core.matches_filename_pattern(f))
            .cloned()
            .collect();
        if files.is_empty() {
            return None;
        }

        core.watcher.take_changed_tests();
        Some(core.specifications(&files))
    }

    /// Drops pending invalidations when no changed test is waiting for them.
    /// Returns whether anything was dropped.
    pub(crate) fn discard_idle_invalidates(&self) -> bool {
        let mut core = self.core();
        if !core.watcher.changed_tests().is_empty() || core.watcher.invalidates().is_empty() {
            return false;
        }
        core.watcher.clear_invalidates();
        true
    }
}

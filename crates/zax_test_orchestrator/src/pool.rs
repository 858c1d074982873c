//! Worker pools.
//!
//! A pool receives the specifications of one run and reports a collected
//! tree per file. How test code executes is the pool's business; the
//! orchestrator only sees [`File`] trees and errors.

use crate::collect::{
    collect_tests, CollectOptions, ModuleLoader, SetupFileRunner, StaticModuleLoader,
};
use crate::project::TestSpecification;
use crate::task::{File, RunMode, Task, TaskKind, TaskResult};
use regex::Regex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors a pool reports for a whole run.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool {pool} failed: {message}")]
    Worker { pool: String, message: String },
    #[error("worker pool i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings passed to the pool for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub name_pattern: Option<Regex>,
    pub allow_only: bool,
    pub setup_files: Vec<PathBuf>,
    /// Set when the run is cancelled; pools stop picking up new files.
    pub cancelled: Arc<AtomicBool>,
}

impl RunOptions {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            setup_files: self.setup_files.clone(),
            allow_only: self.allow_only,
            name_pattern: self.name_pattern.clone(),
        }
    }
}

/// Executes or collects test files.
///
/// `invalidates` lists modules changed since the previous run; a pool that
/// caches loaded modules must not serve them from cache.
pub trait WorkerPool: Send + Sync + 'static {
    fn run_tests(
        &self,
        specs: &[TestSpecification],
        invalidates: &[PathBuf],
        options: &RunOptions,
    ) -> impl Future<Output = Result<Vec<File>, PoolError>> + Send;

    fn collect_tests(
        &self,
        specs: &[TestSpecification],
        invalidates: &[PathBuf],
        options: &RunOptions,
    ) -> impl Future<Output = Result<Vec<File>, PoolError>> + Send;
}

/// Pool that lists tests without executing them.
///
/// Every run re-reads the files, so invalidations need no handling. Skipped
/// and todo tasks are reported as skipped; runnable tasks carry no result.
pub struct StaticPool<L = StaticModuleLoader, S = ()> {
    loader: L,
    setup: S,
}

impl StaticPool {
    pub fn new() -> Self {
        Self {
            loader: StaticModuleLoader::new(),
            setup: (),
        }
    }
}

impl Default for StaticPool {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, S> StaticPool<L, S>
where
    L: ModuleLoader,
    S: SetupFileRunner,
{
    pub fn with(loader: L, setup: S) -> Self {
        Self { loader, setup }
    }

    async fn collect_each(&self, specs: &[TestSpecification], options: &RunOptions) -> Vec<File> {
        let collect_options = options.collect_options();
        let mut files = Vec::with_capacity(specs.len());
        for spec in specs {
            if options.is_cancelled() {
                tracing::info!(
                    target: "collect",
                    remaining = specs.len() - files.len(),
                    "run cancelled"
                );
                break;
            }
            let spec = std::slice::from_ref(spec);
            files.extend(collect_tests(spec, &collect_options, &self.loader, &self.setup).await);
        }
        files
    }
}

impl<L, S> WorkerPool for StaticPool<L, S>
where
    L: ModuleLoader + 'static,
    S: SetupFileRunner + 'static,
{
    async fn run_tests(
        &self,
        specs: &[TestSpecification],
        _invalidates: &[PathBuf],
        options: &RunOptions,
    ) -> Result<Vec<File>, PoolError> {
        let mut files = self.collect_each(specs, options).await;
        for file in &mut files {
            mark_skipped(&mut file.tasks);
        }
        Ok(files)
    }

    async fn collect_tests(
        &self,
        specs: &[TestSpecification],
        _invalidates: &[PathBuf],
        options: &RunOptions,
    ) -> Result<Vec<File>, PoolError> {
        Ok(self.collect_each(specs, options).await)
    }
}

fn mark_skipped(tasks: &mut [Task]) {
    for task in tasks {
        if matches!(task.mode, RunMode::Skip | RunMode::Todo) && task.result.is_none() {
            task.result = Some(TaskResult::skip());
        }
        if let TaskKind::Suite { tasks, .. } = &mut task.kind {
            mark_skipped(tasks);
        }
    }
}

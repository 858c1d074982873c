//! Test collection.
//!
//! Turns test files into interpreted [`File`] trees. Loading a module is a
//! capability ([`ModuleLoader`]); the loader replays the file's registration
//! calls onto a fresh [`CollectContext`] and the collector assembles, hashes
//! and interprets the result. A failure only marks its own file.

pub mod context;
pub mod static_loader;

pub use context::{CollectContext, Registration, SuiteCollector, SuiteFactory, TaskOptions};
pub use static_loader::StaticModuleLoader;

use crate::project::TestSpecification;
use crate::task::{
    calculate_suite_hash, create_file_task, interpret_task_modes, some_tasks_are_only, File,
    TaskError, TaskResult, ROOT_SUITE_ID,
};
use regex::Regex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while collecting a single file.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to run setup file {path}: {message}")]
    Setup { path: PathBuf, message: String },
    #[error("failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("syntax error in {path} at line {line}")]
    Syntax { path: PathBuf, line: u32 },
    #[error("{message}")]
    Describe { suite: String, message: String },
}

impl CollectError {
    /// Error class name reported on the file.
    pub fn name(&self) -> &'static str {
        match self {
            CollectError::Setup { .. } => "SetupError",
            CollectError::Load { .. } => "Error",
            CollectError::Syntax { .. } => "SyntaxError",
            CollectError::Describe { .. } => "Error",
        }
    }
}

impl From<CollectError> for TaskError {
    fn from(error: CollectError) -> Self {
        TaskError::new(error.name(), error.to_string())
    }
}

/// Imports a test file so that its registration calls run against `ctx`.
pub trait ModuleLoader: Send + Sync {
    fn load(
        &self,
        filepath: &Path,
        ctx: &mut CollectContext,
    ) -> impl Future<Output = Result<(), CollectError>> + Send;
}

impl<F> ModuleLoader for F
where
    F: Fn(&Path, &mut CollectContext) -> Result<(), CollectError> + Send + Sync,
{
    fn load(
        &self,
        filepath: &Path,
        ctx: &mut CollectContext,
    ) -> impl Future<Output = Result<(), CollectError>> + Send {
        std::future::ready(self(filepath, ctx))
    }
}

/// Runs the configured setup files before each test file is imported.
pub trait SetupFileRunner: Send + Sync {
    fn run_setup_files(
        &self,
        paths: &[PathBuf],
    ) -> impl Future<Output = Result<(), CollectError>> + Send;
}

/// No setup work.
impl SetupFileRunner for () {
    fn run_setup_files(
        &self,
        _paths: &[PathBuf],
    ) -> impl Future<Output = Result<(), CollectError>> + Send {
        std::future::ready(Ok(()))
    }
}

/// Settings shared by every file of one collection pass.
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub setup_files: Vec<PathBuf>,
    pub allow_only: bool,
    pub name_pattern: Option<Regex>,
}

/// Collects every specification in order, one [`File`] per spec.
///
/// Never fails as a whole: a file whose setup, import or suite bodies fail
/// carries a `fail` result with the error, plus whatever was registered
/// before the failure.
#[tracing::instrument(target = "collect", skip_all, fields(files = specs.len()))]
pub async fn collect_tests<L, S>(
    specs: &[TestSpecification],
    options: &CollectOptions,
    loader: &L,
    setup: &S,
) -> Vec<File>
where
    L: ModuleLoader,
    S: SetupFileRunner,
{
    let mut files = Vec::with_capacity(specs.len());

    for spec in specs {
        let mut file = create_file_task(
            &spec.filepath,
            &spec.project_root,
            &spec.project_name,
            &spec.pool,
        );

        if let Err(error) = collect_file(&mut file, spec, options, loader, setup).await {
            tracing::warn!(target: "collect", file = %file.name, %error, "collection failed");
            file.result = Some(TaskResult::fail(error.into()));
        }

        calculate_suite_hash(&mut file);
        for task in &mut file.tasks {
            if task.suite.as_deref() == Some(ROOT_SUITE_ID) {
                task.suite = None;
            }
        }

        let only_mode = some_tasks_are_only(&file.tasks);
        interpret_task_modes(
            &mut file,
            options.name_pattern.as_ref(),
            spec.test_lines.as_deref(),
            only_mode,
            false,
            options.allow_only,
        );

        tracing::debug!(
            target: "collect",
            file = %file.name,
            tasks = file.all_tasks().len(),
            "collected"
        );
        files.push(file);
    }

    files
}

async fn collect_file<L, S>(
    file: &mut File,
    spec: &TestSpecification,
    options: &CollectOptions,
    loader: &L,
    setup: &S,
) -> Result<(), CollectError>
where
    L: ModuleLoader,
    S: SetupFileRunner,
{
    if options.setup_files.is_empty() {
        file.setup_duration = Some(Duration::ZERO);
    } else {
        let setup_start = Instant::now();
        setup.run_setup_files(&options.setup_files).await?;
        file.setup_duration = Some(setup_start.elapsed());
    }

    let collect_start = Instant::now();
    let mut ctx = CollectContext::new(&spec.filepath);
    loader.load(&spec.filepath, &mut ctx).await?;

    let CollectContext {
        mut default_suite,
        registrations,
        ..
    } = ctx;

    let default_tasks = default_suite.resolve_items()?;
    file.hooks.merge(&default_suite.hooks);
    for mut task in default_tasks {
        task.suite = Some(ROOT_SUITE_ID.to_string());
        file.tasks.push(task);
    }

    for registration in registrations {
        match registration {
            Registration::Task(task) => file.tasks.push(task),
            Registration::Collector(collector) => {
                let mut suite = collector.collect()?;
                if suite.name.is_empty() && suite.tasks().is_empty() {
                    continue;
                }
                if let Some(hooks) = suite.hooks() {
                    file.hooks.merge(hooks);
                }
                suite.suite = Some(ROOT_SUITE_ID.to_string());
                file.tasks.push(suite);
            }
        }
    }

    file.collect_duration = Some(collect_start.elapsed());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::{Hook, RunMode, Task, TaskState};

    fn spec(path: &str) -> TestSpecification {
        TestSpecification {
            filepath: PathBuf::from(path),
            project_name: String::new(),
            project_root: PathBuf::from("/ws"),
            pool: "forks".into(),
            test_lines: None,
        }
    }

    fn registering(path: &Path, ctx: &mut CollectContext) -> Result<(), CollectError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        match name.as_str() {
            "a.test.ts" => {
                ctx.suite().before_all("connect");
                ctx.suite().describe("A", |s| {
                    s.test("B").test("C");
                    Ok(())
                });
                ctx.suite().test("D");
                Ok(())
            }
            "broken.test.ts" => {
                ctx.suite().test("registered first");
                Err(CollectError::Load {
                    path: path.to_path_buf(),
                    message: "Cannot find module './missing'".into(),
                })
            }
            "describe-throws.test.ts" => {
                ctx.suite().test("kept");
                ctx.register(Registration::Collector(SuiteCollector::deferred(
                    "explodes",
                    TaskOptions::new(),
                    |_| {
                        Err(CollectError::Describe {
                            suite: "explodes".into(),
                            message: "boom".into(),
                        })
                    },
                )));
                ctx.register(Registration::Task(Task::test("never", RunMode::Run)));
                Ok(())
            }
            "only.test.ts" => {
                ctx.suite().test("plain");
                ctx.suite().test_with("focused", TaskOptions::new().only());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn options() -> CollectOptions {
        CollectOptions {
            allow_only: true,
            ..CollectOptions::default()
        }
    }

    #[tokio::test]
    async fn builds_hashed_tree_with_root_links_stripped() {
        let files = collect_tests(&[spec("/ws/a.test.ts")], &options(), &registering, &()).await;

        let file = &files[0];
        assert!(file.result.is_none());
        assert_eq!(file.setup_duration, Some(Duration::ZERO));
        assert!(file.collect_duration.is_some());
        assert_eq!(file.hooks.before_all, vec![Hook::new("connect")]);

        let names: Vec<_> = file.all_tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
        assert!(file.tasks.iter().all(|t| t.suite.is_none()));
        assert_eq!(file.tasks[0].tasks()[0].suite.as_deref(), Some(file.tasks[0].id.as_str()));
        assert_eq!(file.tasks[0].id, format!("{}_0", file.id));
    }

    #[tokio::test]
    async fn failure_is_isolated_to_its_file() {
        let specs = [spec("/ws/a.test.ts"), spec("/ws/broken.test.ts")];
        let files = collect_tests(&specs, &options(), &registering, &()).await;

        assert_eq!(files.len(), 2);
        assert!(!files[0].has_failed());

        let broken = &files[1];
        let result = broken.result.as_ref().unwrap();
        assert_eq!(result.state, TaskState::Fail);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("./missing"));
        assert!(broken.collect_duration.is_none());
    }

    #[tokio::test]
    async fn describe_failure_keeps_earlier_tasks() {
        let files = collect_tests(
            &[spec("/ws/describe-throws.test.ts")],
            &options(),
            &registering,
            &(),
        )
        .await;

        let file = &files[0];
        assert_eq!(file.result.as_ref().unwrap().errors[0].message, "boom");
        let names: Vec<_> = file.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[tokio::test]
    async fn empty_anonymous_collectors_are_dropped() {
        let loader = |_: &Path, ctx: &mut CollectContext| -> Result<(), CollectError> {
            ctx.register(Registration::Collector(SuiteCollector::new("", TaskOptions::new())));
            ctx.register(Registration::Collector(SuiteCollector::new("named", TaskOptions::new())));
            Ok(())
        };
        let files = collect_tests(&[spec("/ws/x.test.ts")], &options(), &loader, &()).await;
        let names: Vec<_> = files[0].tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["named"]);
    }

    #[tokio::test]
    async fn only_and_allow_only_are_interpreted() {
        let files = collect_tests(&[spec("/ws/only.test.ts")], &options(), &registering, &()).await;
        let modes: Vec<_> = files[0].tasks.iter().map(|t| t.mode).collect();
        assert_eq!(modes, vec![RunMode::Skip, RunMode::Run]);

        let strict = CollectOptions::default();
        let files = collect_tests(&[spec("/ws/only.test.ts")], &strict, &registering, &()).await;
        assert!(files[0].tasks[1].has_failed());
    }

    #[tokio::test]
    async fn location_filter_comes_from_the_spec() {
        let loader = |_: &Path, ctx: &mut CollectContext| -> Result<(), CollectError> {
            ctx.suite()
                .test_with("first", TaskOptions::new().at(1, 1))
                .test_with("second", TaskOptions::new().at(2, 1));
            Ok(())
        };
        let mut located = spec("/ws/lines.test.ts");
        located.test_lines = Some(vec![2]);

        let files = collect_tests(&[located], &options(), &loader, &()).await;

        let modes: Vec<_> = files[0].tasks.iter().map(|t| t.mode).collect();
        assert_eq!(modes, vec![RunMode::Skip, RunMode::Run]);
        assert!(files[0].result.is_none());
    }

    struct FailingSetup;

    impl SetupFileRunner for FailingSetup {
        async fn run_setup_files(&self, paths: &[PathBuf]) -> Result<(), CollectError> {
            Err(CollectError::Setup {
                path: paths[0].clone(),
                message: "setup exploded".into(),
            })
        }
    }

    #[tokio::test]
    async fn setup_failure_fails_the_file() {
        let options = CollectOptions {
            setup_files: vec![PathBuf::from("/ws/setup.ts")],
            ..options()
        };
        let specs = [spec("/ws/a.test.ts")];
        let files = collect_tests(&specs, &options, &registering, &FailingSetup).await;

        let file = &files[0];
        assert!(file.tasks.is_empty());
        assert!(file.setup_duration.is_none());
        assert_eq!(file.result.as_ref().unwrap().errors[0].name, "SetupError");
    }
}

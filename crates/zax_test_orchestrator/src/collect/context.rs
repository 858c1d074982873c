//! Per-file registration context.
//!
//! Every collection pass gets a fresh [`CollectContext`]; nothing about the
//! registrations of one file survives into the next.

use super::CollectError;
use crate::task::{Hook, HookKind, HookSet, Location, RunMode, Task};
use std::fmt;
use std::path::{Path, PathBuf};

/// Deferred body of a suite, run when the suite is collected.
pub type SuiteFactory = Box<dyn FnOnce(&mut SuiteCollector) -> Result<(), CollectError> + Send>;

/// Modifiers of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    only: bool,
    skip: bool,
    todo: bool,
    body: bool,
    location: Option<Location>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            only: false,
            skip: false,
            todo: false,
            body: true,
            location: None,
        }
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn todo(mut self) -> Self {
        self.todo = true;
        self
    }

    pub fn skip_if(mut self, condition: bool) -> Self {
        self.skip |= condition;
        self
    }

    pub fn run_if(mut self, condition: bool) -> Self {
        self.skip |= !condition;
        self
    }

    /// Registered without a callback.
    pub fn without_body(mut self) -> Self {
        self.body = false;
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Some(Location { line, column });
        self
    }

    /// `only` wins over `skip`, which wins over `todo`. A bodiless
    /// registration that would otherwise run is `todo`.
    pub fn mode(&self) -> RunMode {
        if self.only {
            RunMode::Only
        } else if self.skip {
            RunMode::Skip
        } else if self.todo || !self.body {
            RunMode::Todo
        } else {
            RunMode::Run
        }
    }
}

/// Something registered at the top level of a file or inside a suite.
pub enum Registration {
    /// Already reportable: test, custom task or finished suite.
    Task(Task),
    /// A suite whose body has not been collected yet.
    Collector(SuiteCollector),
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Task(task) => f.debug_tuple("Task").field(&task.name).finish(),
            Registration::Collector(c) => f.debug_tuple("Collector").field(&c.name).finish(),
        }
    }
}

/// A suite under construction.
pub struct SuiteCollector {
    pub(super) name: String,
    mode: RunMode,
    location: Option<Location>,
    pub(super) hooks: HookSet,
    items: Vec<Registration>,
    factory: Option<SuiteFactory>,
}

impl SuiteCollector {
    pub fn new(name: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            name: name.into(),
            mode: options.mode(),
            location: options.location,
            hooks: HookSet::default(),
            items: Vec::new(),
            factory: None,
        }
    }

    /// A suite whose children are registered by `factory` at collection.
    pub fn deferred<F>(name: impl Into<String>, options: TaskOptions, factory: F) -> Self
    where
        F: FnOnce(&mut SuiteCollector) -> Result<(), CollectError> + Send + 'static,
    {
        Self {
            factory: Some(Box::new(factory)),
            ..Self::new(name, options)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn test(&mut self, name: impl Into<String>) -> &mut Self {
        self.test_with(name, TaskOptions::new())
    }

    pub fn test_with(&mut self, name: impl Into<String>, options: TaskOptions) -> &mut Self {
        self.push_task(Task::test(name, options.mode()), options)
    }

    pub fn todo(&mut self, name: impl Into<String>) -> &mut Self {
        self.test_with(name, TaskOptions::new().todo())
    }

    pub fn custom(&mut self, name: impl Into<String>, options: TaskOptions) -> &mut Self {
        self.push_task(Task::custom(name, options.mode()), options)
    }

    pub fn describe<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: FnOnce(&mut SuiteCollector) -> Result<(), CollectError> + Send + 'static,
    {
        self.describe_with(name, TaskOptions::new(), factory)
    }

    pub fn describe_with<F>(
        &mut self,
        name: impl Into<String>,
        options: TaskOptions,
        factory: F,
    ) -> &mut Self
    where
        F: FnOnce(&mut SuiteCollector) -> Result<(), CollectError> + Send + 'static,
    {
        self.add_suite(SuiteCollector::deferred(name, options, factory))
    }

    /// Registers a nested suite built by the caller.
    pub fn add_suite(&mut self, suite: SuiteCollector) -> &mut Self {
        self.items.push(Registration::Collector(suite));
        self
    }

    pub fn hook(&mut self, kind: HookKind, hook: Hook) -> &mut Self {
        self.hooks.push(kind, hook);
        self
    }

    pub fn before_all(&mut self, label: impl Into<String>) -> &mut Self {
        self.hook(HookKind::BeforeAll, Hook::new(label))
    }

    pub fn after_all(&mut self, label: impl Into<String>) -> &mut Self {
        self.hook(HookKind::AfterAll, Hook::new(label))
    }

    pub fn before_each(&mut self, label: impl Into<String>) -> &mut Self {
        self.hook(HookKind::BeforeEach, Hook::new(label))
    }

    pub fn after_each(&mut self, label: impl Into<String>) -> &mut Self {
        self.hook(HookKind::AfterEach, Hook::new(label))
    }

    fn push_task(&mut self, mut task: Task, options: TaskOptions) -> &mut Self {
        task.location = options.location;
        self.items.push(Registration::Task(task));
        self
    }

    /// Runs the factory and resolves nested collectors into suites,
    /// leaving name, mode and hooks in place.
    pub(super) fn resolve_items(&mut self) -> Result<Vec<Task>, CollectError> {
        if let Some(factory) = self.factory.take() {
            factory(self)?;
        }
        let items = std::mem::take(&mut self.items);
        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Registration::Task(task) => tasks.push(task),
                Registration::Collector(collector) => tasks.push(collector.collect()?),
            }
        }
        Ok(tasks)
    }

    /// Collects this suite and everything under it into a [`Task`].
    pub fn collect(mut self) -> Result<Task, CollectError> {
        let tasks = self.resolve_items()?;
        let mut suite = Task::suite(self.name, self.mode, tasks);
        suite.location = self.location;
        if let crate::task::TaskKind::Suite { hooks, .. } = &mut suite.kind {
            *hooks = self.hooks;
        }
        Ok(suite)
    }
}

/// Registration state of one file being collected.
pub struct CollectContext {
    filepath: PathBuf,
    pub(super) default_suite: SuiteCollector,
    pub(super) registrations: Vec<Registration>,
}

impl CollectContext {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            default_suite: SuiteCollector::new("", TaskOptions::new()),
            registrations: Vec::new(),
        }
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// The anonymous suite that top-level `test`/`describe` calls land in.
    pub fn suite(&mut self) -> &mut SuiteCollector {
        &mut self.default_suite
    }

    /// Registers a task or collector directly on the file, outside the
    /// default suite.
    pub fn register(&mut self, registration: Registration) -> &mut Self {
        self.registrations.push(registration);
        self
    }
}

//! Collected task trees.
//!
//! A [`File`] is the root of a tree of [`Task`]s. Children are owned by their
//! parent suite in declaration order; the link back to the parent is only an
//! id (`Task::suite`), so trees carry no reference cycles.

pub mod hash;
pub mod hooks;
pub mod mode;

pub use hash::{calculate_suite_hash, create_file_task, generate_hash};
pub use hooks::{Hook, HookKind, HookSet};
pub use mode::{interpret_task_modes, some_tasks_are_only};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Id of the synthetic root suite that top-level registrations attach to.
pub const ROOT_SUITE_ID: &str = "";

/// Whether a task executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Run,
    Skip,
    Only,
    Todo,
}

/// Outcome state of an executed (or failed-to-collect) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pass,
    Fail,
    Skip,
}

/// A normalized error attached to a task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub name: String,
    pub message: String,
}

impl TaskError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl TaskResult {
    /// A failed result carrying a single error.
    pub fn fail(error: TaskError) -> Self {
        Self {
            state: TaskState::Fail,
            errors: vec![error],
            duration: None,
        }
    }

    /// Result of a task that was not executed.
    pub fn skip() -> Self {
        Self {
            state: TaskState::Skip,
            errors: Vec::new(),
            duration: None,
        }
    }

    pub fn pass(duration: Duration) -> Self {
        Self {
            state: TaskState::Pass,
            errors: Vec::new(),
            duration: Some(duration),
        }
    }
}

/// 1-based source position of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// Variant-specific task data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskKind {
    Test,
    Custom,
    Suite {
        tasks: Vec<Task>,
        #[serde(default, skip_serializing_if = "HookSet::is_empty")]
        hooks: HookSet,
    },
}

/// A node of a collected tree: suite, test or custom task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub mode: RunMode,
    /// Id of the parent suite. `None` for top-level tasks of a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    /// Id of the owning file.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl Task {
    pub fn test(name: impl Into<String>, mode: RunMode) -> Self {
        Self::with_kind(name, mode, TaskKind::Test)
    }

    pub fn custom(name: impl Into<String>, mode: RunMode) -> Self {
        Self::with_kind(name, mode, TaskKind::Custom)
    }

    pub fn suite(name: impl Into<String>, mode: RunMode, tasks: Vec<Task>) -> Self {
        Self::with_kind(
            name,
            mode,
            TaskKind::Suite {
                tasks,
                hooks: HookSet::default(),
            },
        )
    }

    fn with_kind(name: impl Into<String>, mode: RunMode, kind: TaskKind) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            mode,
            suite: None,
            file: String::new(),
            location: None,
            result: None,
            kind,
        }
    }

    pub fn is_suite(&self) -> bool {
        matches!(self.kind, TaskKind::Suite { .. })
    }

    pub fn is_test(&self) -> bool {
        matches!(self.kind, TaskKind::Test)
    }

    /// Children of a suite; empty for tests and custom tasks.
    pub fn tasks(&self) -> &[Task] {
        match &self.kind {
            TaskKind::Suite { tasks, .. } => tasks,
            TaskKind::Test | TaskKind::Custom => &[],
        }
    }

    pub fn hooks(&self) -> Option<&HookSet> {
        match &self.kind {
            TaskKind::Suite { hooks, .. } => Some(hooks),
            TaskKind::Test | TaskKind::Custom => None,
        }
    }

    pub fn has_failed(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(|r| r.state == TaskState::Fail)
            || self.tasks().iter().any(Task::has_failed)
    }
}

/// Root of a collected tree: one test file within one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: String,
    /// Path relative to the project root, forward slashes.
    pub name: String,
    pub filepath: PathBuf,
    pub project_name: String,
    pub pool: String,
    pub mode: RunMode,
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Zero when the project has no setup files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "HookSet::is_empty")]
    pub hooks: HookSet,
}

impl File {
    /// True if the file itself or any task in it failed.
    pub fn has_failed(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(|r| r.state == TaskState::Fail)
            || self.tasks.iter().any(Task::has_failed)
    }

    /// Every task of the tree, depth-first pre-order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        fn walk<'a>(tasks: &'a [Task], out: &mut Vec<&'a Task>) {
            for task in tasks {
                out.push(task);
                walk(task.tasks(), out);
            }
        }
        let mut out = Vec::new();
        walk(&self.tasks, &mut out);
        out
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.all_tasks().into_iter().find(|t| t.id == id)
    }

    /// Total time spent on the file: setup, collection and task durations.
    pub fn duration(&self) -> Duration {
        let tasks: Duration = self
            .all_tasks()
            .iter()
            .filter_map(|t| t.result.as_ref().and_then(|r| r.duration))
            .sum();
        self.setup_duration.unwrap_or_default() + self.collect_duration.unwrap_or_default() + tasks
    }
}

/// Space-joined ancestor path of a task, root excluded.
pub fn full_name(ancestors: &[String], name: &str) -> String {
    if ancestors.is_empty() {
        return name.to_string();
    }
    format!("{} {}", ancestors.join(" "), name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_file() -> File {
        let mut file = create_file_task(
            std::path::Path::new("/ws/src/a.test.ts"),
            std::path::Path::new("/ws"),
            "",
            "forks",
        );
        file.tasks = vec![
            Task::suite(
                "A",
                RunMode::Run,
                vec![Task::test("B", RunMode::Run), Task::test("C", RunMode::Run)],
            ),
            Task::test("D", RunMode::Run),
        ];
        calculate_suite_hash(&mut file);
        file
    }

    #[test]
    fn full_name_joins_ancestors_with_spaces() {
        assert_eq!(full_name(&[], "B"), "B");
        assert_eq!(full_name(&["A".into(), "inner".into()], "B"), "A inner B");
    }

    #[test]
    fn all_tasks_is_pre_order() {
        let file = sample_file();
        let names: Vec<_> = file.all_tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn has_failed_sees_nested_failures() {
        let mut file = sample_file();
        assert!(!file.has_failed());
        if let TaskKind::Suite { tasks, .. } = &mut file.tasks[0].kind {
            tasks[1].result = Some(TaskResult::fail(TaskError::new("Error", "boom")));
        }
        assert!(file.has_failed());
    }

    #[test]
    fn find_looks_up_by_positional_id() {
        let file = sample_file();
        let id = format!("{}_0_1", file.id);
        assert_eq!(file.find(&id).unwrap().name, "C");
    }

    #[test]
    fn serializes_with_type_tag() {
        let file = sample_file();
        let json = serde_json::to_value(&file.tasks[0]).unwrap();
        assert_eq!(json["type"], "suite");
        assert_eq!(json["mode"], "run");
        assert_eq!(json["tasks"][0]["type"], "test");
    }
}

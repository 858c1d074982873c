//! Run-mode interpretation.
//!
//! Rewrites the modes of a freshly collected tree in place: `only` demotes
//! everything outside an `only` path, skipped suites skip their subtree, the
//! name pattern and location filter narrow tests, and suites left without a
//! runnable child collapse to `skip`.

use super::{full_name, File, RunMode, Task, TaskError, TaskKind, TaskResult, TaskState};
use regex::Regex;

const ONLY_VIOLATION: &str =
    "Unexpected .only modifier. Remove it or pass --allowOnly argument to bypass this error";

/// Interprets `only`, `skip`, name-pattern and location rules over `file`.
///
/// `only_mode` must be true iff any task of the file is `only` (see
/// [`some_tasks_are_only`]). An `only` met while `allow_only` is false fails
/// that task instead of returning an error.
pub fn interpret_task_modes(
    file: &mut File,
    name_pattern: Option<&Regex>,
    test_locations: Option<&[u32]>,
    only_mode: bool,
    parent_is_only: bool,
    allow_only: bool,
) {
    let mut interpreter = Interpreter {
        name_pattern,
        locations: test_locations.filter(|lines| !lines.is_empty()),
        only_mode,
        allow_only,
        matched_locations: Vec::new(),
    };
    let mut ancestors = Vec::new();
    interpreter.traverse(
        &mut file.mode,
        &mut file.tasks,
        parent_is_only,
        false,
        &mut ancestors,
    );

    let Some(lines) = interpreter.locations else {
        return;
    };
    let missing: Vec<String> = lines
        .iter()
        .filter(|line| !interpreter.matched_locations.contains(line))
        .map(u32::to_string)
        .collect();
    if missing.is_empty() {
        return;
    }
    let which = if missing.len() == 1 {
        format!("line {}", missing[0])
    } else {
        format!("lines {}", missing.join(", "))
    };
    let error = TaskError::new(
        "TestFilterError",
        format!("No test found in {} in {which}", file.name),
    );
    file.result
        .get_or_insert_with(|| TaskResult {
            state: TaskState::Fail,
            errors: Vec::new(),
            duration: None,
        })
        .errors
        .push(error);
}

/// True if any task in `tasks`, at any depth, is `only`.
pub fn some_tasks_are_only(tasks: &[Task]) -> bool {
    tasks
        .iter()
        .any(|t| t.mode == RunMode::Only || some_tasks_are_only(t.tasks()))
}

/// Flips every `run` task under a skipped suite to `skip`.
fn skip_all_tasks(tasks: &mut [Task]) {
    for task in tasks {
        if task.mode != RunMode::Run {
            continue;
        }
        task.mode = RunMode::Skip;
        if let TaskKind::Suite { tasks, .. } = &mut task.kind {
            skip_all_tasks(tasks);
        }
    }
}

fn check_allow_only(task: &mut Task, allow_only: bool) {
    if allow_only {
        return;
    }
    task.result = Some(TaskResult::fail(TaskError::new("Error", ONLY_VIOLATION)));
}

struct Interpreter<'a> {
    name_pattern: Option<&'a Regex>,
    locations: Option<&'a [u32]>,
    only_mode: bool,
    allow_only: bool,
    matched_locations: Vec<u32>,
}

impl Interpreter<'_> {
    fn traverse(
        &mut self,
        suite_mode: &mut RunMode,
        tasks: &mut [Task],
        parent_is_only: bool,
        parent_matched_location: bool,
        ancestors: &mut Vec<String>,
    ) {
        let suite_is_only = parent_is_only || *suite_mode == RunMode::Only;

        for task in tasks.iter_mut() {
            let include_task = suite_is_only || task.mode == RunMode::Only;
            if self.only_mode {
                self.apply_only(task, include_task);
            }
            let matched_location = self.apply_location(task, parent_matched_location);

            match &mut task.kind {
                TaskKind::Test => {
                    if let Some(pattern) = self.name_pattern {
                        if !pattern.is_match(&full_name(ancestors, &task.name)) {
                            task.mode = RunMode::Skip;
                        }
                    }
                }
                TaskKind::Suite { tasks: children, .. } => {
                    if task.mode == RunMode::Skip {
                        skip_all_tasks(children);
                    } else {
                        ancestors.push(task.name.clone());
                        self.traverse(
                            &mut task.mode,
                            children,
                            include_task,
                            matched_location,
                            ancestors,
                        );
                        ancestors.pop();
                    }
                }
                TaskKind::Custom => {}
            }
        }

        if *suite_mode == RunMode::Run
            && !tasks.is_empty()
            && tasks.iter().all(|t| t.mode != RunMode::Run)
        {
            *suite_mode = RunMode::Skip;
        }
    }

    fn apply_only(&self, task: &mut Task, include_task: bool) {
        if task.is_suite() && (include_task || some_tasks_are_only(task.tasks())) {
            if task.mode == RunMode::Only {
                check_allow_only(task, self.allow_only);
                task.mode = RunMode::Run;
            }
        } else if task.mode == RunMode::Run && !include_task {
            task.mode = RunMode::Skip;
        } else if task.mode == RunMode::Only {
            check_allow_only(task, self.allow_only);
            task.mode = RunMode::Run;
        }
    }

    /// Returns whether `task`'s subtree is selected by a location.
    fn apply_location(&mut self, task: &mut Task, parent_matched: bool) -> bool {
        let Some(lines) = self.locations else {
            return parent_matched;
        };
        match task.location {
            Some(location) if lines.contains(&location.line) => {
                task.mode = RunMode::Run;
                self.matched_locations.push(location.line);
                true
            }
            _ if parent_matched => {
                task.mode = RunMode::Run;
                true
            }
            _ => {
                if task.is_test() {
                    task.mode = RunMode::Skip;
                }
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::{calculate_suite_hash, create_file_task, Location};
    use std::path::Path;

    fn file_with(tasks: Vec<Task>) -> File {
        let mut file = create_file_task(Path::new("/ws/a.test.ts"), Path::new("/ws"), "", "forks");
        file.tasks = tasks;
        calculate_suite_hash(&mut file);
        file
    }

    fn interpret(file: &mut File, pattern: Option<&Regex>, allow_only: bool) {
        let only_mode = some_tasks_are_only(&file.tasks);
        interpret_task_modes(file, pattern, None, only_mode, false, allow_only);
    }

    fn at(line: u32, mut task: Task) -> Task {
        task.location = Some(Location { line, column: 1 });
        task
    }

    fn modes(file: &File) -> Vec<(String, RunMode)> {
        file.all_tasks()
            .iter()
            .map(|t| (t.name.clone(), t.mode))
            .collect()
    }

    fn mode_of(file: &File, name: &str) -> RunMode {
        file.all_tasks()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
            .mode
    }

    #[test]
    fn only_scenario_from_two_suites() {
        let mut file = file_with(vec![
            Task::suite(
                "S1",
                RunMode::Run,
                vec![Task::test("t1", RunMode::Run), Task::test("t2", RunMode::Only)],
            ),
            Task::suite("S2", RunMode::Run, vec![Task::test("t3", RunMode::Run)]),
        ]);

        interpret(&mut file, None, true);

        assert_eq!(mode_of(&file, "t2"), RunMode::Run);
        assert_eq!(mode_of(&file, "t1"), RunMode::Skip);
        assert_eq!(mode_of(&file, "S1"), RunMode::Run);
        assert_eq!(mode_of(&file, "t3"), RunMode::Skip);
        assert_eq!(mode_of(&file, "S2"), RunMode::Skip);
        assert!(file.all_tasks().iter().all(|t| t.result.is_none()));
    }

    #[test]
    fn only_suite_keeps_its_whole_subtree() {
        let mut file = file_with(vec![
            Task::suite(
                "focused",
                RunMode::Only,
                vec![
                    Task::test("a", RunMode::Run),
                    Task::suite("nested", RunMode::Run, vec![Task::test("b", RunMode::Run)]),
                ],
            ),
            Task::test("outside", RunMode::Run),
        ]);

        interpret(&mut file, None, true);

        assert_eq!(
            modes(&file),
            vec![
                ("focused".into(), RunMode::Run),
                ("a".into(), RunMode::Run),
                ("nested".into(), RunMode::Run),
                ("b".into(), RunMode::Run),
                ("outside".into(), RunMode::Skip),
            ]
        );
    }

    #[test]
    fn only_demotes_every_run_task_off_the_only_path() {
        let mut file = file_with(vec![
            Task::test("top", RunMode::Run),
            Task::suite(
                "deep",
                RunMode::Run,
                vec![Task::suite(
                    "deeper",
                    RunMode::Run,
                    vec![Task::test("x", RunMode::Run), Task::test("y", RunMode::Only)],
                )],
            ),
            Task::suite("other", RunMode::Run, vec![Task::test("z", RunMode::Run)]),
        ]);

        interpret(&mut file, None, true);

        let running: Vec<_> = file
            .all_tasks()
            .iter()
            .filter(|t| t.mode == RunMode::Run && t.is_test())
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(running, vec!["y".to_string()]);
        assert_eq!(mode_of(&file, "deep"), RunMode::Run);
        assert_eq!(mode_of(&file, "other"), RunMode::Skip);
    }

    #[test]
    fn skipped_suite_skips_run_descendants() {
        let mut file = file_with(vec![Task::suite(
            "skipped",
            RunMode::Skip,
            vec![
                Task::test("a", RunMode::Run),
                Task::suite("inner", RunMode::Run, vec![Task::test("b", RunMode::Run)]),
                Task::test("later", RunMode::Todo),
            ],
        )]);

        interpret(&mut file, None, true);

        assert_eq!(mode_of(&file, "a"), RunMode::Skip);
        assert_eq!(mode_of(&file, "inner"), RunMode::Skip);
        assert_eq!(mode_of(&file, "b"), RunMode::Skip);
        assert_eq!(mode_of(&file, "later"), RunMode::Todo);
    }

    #[test]
    fn suite_without_runnable_children_collapses() {
        let mut file = file_with(vec![
            Task::suite(
                "all todo",
                RunMode::Run,
                vec![Task::test("a", RunMode::Todo), Task::test("b", RunMode::Skip)],
            ),
            Task::suite("empty", RunMode::Run, Vec::new()),
        ]);

        interpret(&mut file, None, true);

        assert_eq!(mode_of(&file, "all todo"), RunMode::Skip);
        // No children: nothing to collapse on.
        assert_eq!(mode_of(&file, "empty"), RunMode::Run);
        assert_eq!(file.mode, RunMode::Run);
    }

    #[test]
    fn file_collapses_when_nothing_runs() {
        let mut file = file_with(vec![Task::test("a", RunMode::Skip)]);
        interpret(&mut file, None, true);
        assert_eq!(file.mode, RunMode::Skip);
    }

    #[test]
    fn name_pattern_matches_full_ancestor_path() {
        let tasks = || {
            vec![Task::suite("A", RunMode::Run, vec![Task::test("B", RunMode::Run)])]
        };

        let mut kept = file_with(tasks());
        interpret(&mut kept, Some(&Regex::new("A B").unwrap()), true);
        assert_eq!(mode_of(&kept, "B"), RunMode::Run);
        assert_eq!(mode_of(&kept, "A"), RunMode::Run);

        let mut dropped = file_with(tasks());
        interpret(&mut dropped, Some(&Regex::new("A C").unwrap()), true);
        assert_eq!(mode_of(&dropped, "B"), RunMode::Skip);
        assert_eq!(mode_of(&dropped, "A"), RunMode::Skip);
    }

    #[test]
    fn name_pattern_applies_outside_only_mode_and_ignores_custom() {
        let mut file = file_with(vec![
            Task::test("math adds", RunMode::Run),
            Task::test("strings", RunMode::Run),
            Task::custom("bench", RunMode::Run),
        ]);

        interpret(&mut file, Some(&Regex::new("^math").unwrap()), true);

        assert_eq!(mode_of(&file, "math adds"), RunMode::Run);
        assert_eq!(mode_of(&file, "strings"), RunMode::Skip);
        assert_eq!(mode_of(&file, "bench"), RunMode::Run);
    }

    #[test]
    fn disallowed_only_fails_the_task_but_still_runs_it() {
        let mut file = file_with(vec![
            Task::test("focused", RunMode::Only),
            Task::test("other", RunMode::Run),
        ]);

        interpret(&mut file, None, false);

        let focused = &file.tasks[0];
        assert_eq!(focused.mode, RunMode::Run);
        let result = focused.result.as_ref().unwrap();
        assert_eq!(result.state, TaskState::Fail);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains(".only"));
        assert!(file.tasks[1].result.is_none());
        assert!(file.result.is_none());
    }

    #[test]
    fn allowed_only_attaches_no_result() {
        let mut file = file_with(vec![Task::test("focused", RunMode::Only)]);
        interpret(&mut file, None, true);
        assert_eq!(file.tasks[0].mode, RunMode::Run);
        assert!(file.tasks[0].result.is_none());
    }

    #[test]
    fn disallowed_only_suite_is_failed_once() {
        let mut file = file_with(vec![Task::suite(
            "focused",
            RunMode::Only,
            vec![Task::test("inner", RunMode::Only)],
        )]);

        interpret(&mut file, None, false);

        assert!(file.tasks[0].result.is_some());
        assert!(file.tasks[0].tasks()[0].result.is_some());
        assert_eq!(file.tasks[0].tasks()[0].mode, RunMode::Run);
    }

    #[test]
    fn location_filter_selects_tests_and_subtrees() {
        let mut file = file_with(vec![
            at(1, Task::test("first", RunMode::Run)),
            at(
                3,
                Task::suite(
                    "group",
                    RunMode::Run,
                    vec![
                        at(4, Task::test("inner", RunMode::Skip)),
                        at(5, Task::test("inner2", RunMode::Run)),
                    ],
                ),
            ),
            at(8, Task::test("last", RunMode::Run)),
        ]);

        interpret_task_modes(&mut file, None, Some(&[3]), false, false, true);

        assert_eq!(mode_of(&file, "first"), RunMode::Skip);
        assert_eq!(mode_of(&file, "group"), RunMode::Run);
        assert_eq!(mode_of(&file, "inner"), RunMode::Run);
        assert_eq!(mode_of(&file, "inner2"), RunMode::Run);
        assert_eq!(mode_of(&file, "last"), RunMode::Skip);
        assert!(file.result.is_none());
    }

    #[test]
    fn unmatched_locations_fail_the_file() {
        let mut file = file_with(vec![at(2, Task::test("only one", RunMode::Run))]);

        interpret_task_modes(&mut file, None, Some(&[2, 10, 12]), false, false, true);

        let result = file.result.as_ref().unwrap();
        assert_eq!(result.state, TaskState::Fail);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].message,
            "No test found in a.test.ts in lines 10, 12"
        );
        assert_eq!(mode_of(&file, "only one"), RunMode::Run);
    }

    #[test]
    fn empty_location_list_is_ignored() {
        let mut file = file_with(vec![Task::test("a", RunMode::Run)]);
        interpret_task_modes(&mut file, None, Some(&[]), false, false, true);
        assert_eq!(mode_of(&file, "a"), RunMode::Run);
        assert!(file.result.is_none());
    }

    #[test]
    fn some_tasks_are_only_scans_recursively() {
        let nested = vec![Task::suite(
            "a",
            RunMode::Run,
            vec![Task::suite("b", RunMode::Run, vec![Task::test("c", RunMode::Only)])],
        )];
        assert!(some_tasks_are_only(&nested));
        assert!(!some_tasks_are_only(&[Task::test("x", RunMode::Run)]));
    }
}

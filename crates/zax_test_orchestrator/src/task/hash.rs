//! File ids and positional task ids.
//!
//! File ids are a 32-bit rolling hash of `relative_path + project_name`, so
//! every process that sees the same file and project derives the same id
//! without talking to the others. The hash is not collision resistant; it is
//! a dedup and display key, and a collision only merges two entries in
//! reporting.

use super::{File, HookSet, RunMode, Task, TaskKind};
use crate::normalize::path::relative_slash;
use std::path::Path;

/// Java-style string hash over UTF-16 code units, wrapping at 32 bits.
///
/// The empty string hashes to `"0"`. The result is rendered as a signed
/// decimal and may be negative.
pub fn generate_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    hash.to_string()
}

/// Builds an empty root for `filepath` in `project_name`.
pub fn create_file_task(filepath: &Path, root: &Path, project_name: &str, pool: &str) -> File {
    let name = relative_slash(root, filepath);
    File {
        id: generate_hash(&format!("{name}{project_name}")),
        name,
        filepath: filepath.to_path_buf(),
        project_name: project_name.to_string(),
        pool: pool.to_string(),
        mode: RunMode::Run,
        tasks: Vec::new(),
        result: None,
        setup_duration: None,
        collect_duration: None,
        hooks: HookSet::default(),
    }
}

/// Assigns `{parent_id}_{index}` ids to every task, depth-first pre-order.
///
/// Must run on the finished tree: ids depend on final sibling order. Nested
/// tasks get their `suite` link pointed at the new parent id; top-level tasks
/// keep theirs so the root reference can be stripped afterwards.
pub fn calculate_suite_hash(file: &mut File) {
    for (index, task) in file.tasks.iter_mut().enumerate() {
        task.id = format!("{}_{index}", file.id);
        task.file.clone_from(&file.id);
        hash_children(task, &file.id);
    }
}

fn hash_children(parent: &mut Task, file_id: &str) {
    let TaskKind::Suite { tasks, .. } = &mut parent.kind else {
        return;
    };
    for (index, task) in tasks.iter_mut().enumerate() {
        task.id = format!("{}_{index}", parent.id);
        task.suite = Some(parent.id.clone());
        task.file = file_id.to_string();
        hash_children(task, file_id);
    }
}

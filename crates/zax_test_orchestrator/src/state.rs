//! Collected files and errors of the current session.

use crate::task::{File, TaskError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Latest collected tree per file and project, plus unhandled errors.
#[derive(Debug, Default)]
pub struct StateManager {
    files: BTreeMap<PathBuf, Vec<File>>,
    errors: Vec<TaskError>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `files`, replacing the previous tree of the same file and
    /// project. Trees of other projects for the same path are kept.
    pub fn collect_files(&mut self, files: Vec<File>) {
        for file in files {
            let entry = self.files.entry(file.filepath.clone()).or_default();
            entry.retain(|existing| existing.project_name != file.project_name);
            entry.push(file);
        }
    }

    /// Every stored tree, optionally restricted to `paths`.
    pub fn get_files(&self, paths: Option<&[PathBuf]>) -> Vec<&File> {
        match paths {
            Some(paths) => paths
                .iter()
                .filter_map(|p| self.files.get(p))
                .flatten()
                .collect(),
            None => self.files.values().flatten().collect(),
        }
    }

    pub fn get_filepaths(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    /// Paths with at least one failed tree.
    pub fn get_failed_filepaths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|(_, files)| files.iter().any(File::has_failed))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn remove_file(&mut self, path: &Path) -> bool {
        self.files.remove(path).is_some()
    }

    pub fn catch_error(&mut self, error: TaskError) {
        self.errors.push(error);
    }

    pub fn unhandled_errors(&self) -> &[TaskError] {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

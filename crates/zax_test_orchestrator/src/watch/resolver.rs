//! Changed path to test files to rerun.
//!
//! Walks importer edges from the changed module up to test files. The two
//! pending sets double as the visited guard of the walk, so cycles in the
//! import graph terminate.

use crate::normalize::path::slash;
use crate::project::TestProject;
use crate::state::StateManager;
use globset::GlobSet;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Pending watch-mode work: test files to rerun and modules to invalidate.
#[derive(Debug)]
pub struct DependencyGraphResolver {
    changed_tests: BTreeSet<PathBuf>,
    invalidates: BTreeSet<PathBuf>,
    force_rerun_triggers: GlobSet,
}

impl DependencyGraphResolver {
    pub fn new(force_rerun_triggers: GlobSet) -> Self {
        Self {
            changed_tests: BTreeSet::new(),
            invalidates: BTreeSet::new(),
            force_rerun_triggers,
        }
    }

    pub fn changed_tests(&self) -> &BTreeSet<PathBuf> {
        &self.changed_tests
    }

    pub fn invalidates(&self) -> &BTreeSet<PathBuf> {
        &self.invalidates
    }

    pub fn take_changed_tests(&mut self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut self.changed_tests)
    }

    pub fn take_invalidates(&mut self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut self.invalidates)
    }

    pub fn clear_invalidates(&mut self) {
        self.invalidates.clear();
    }

    /// Resolves which files need a rerun because `path` changed.
    ///
    /// An empty result means nothing to rerun. Every test file found on the
    /// way is also added to the pending changed set.
    pub fn handle_file_changed(
        &mut self,
        path: &Path,
        projects: &[TestProject],
        state: &StateManager,
    ) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();

        if self.changed_tests.contains(path) || self.invalidates.contains(path) {
            return files;
        }

        if self.force_rerun_triggers.is_match(path) {
            tracing::info!(target: "watch", path = %path.display(), "force rerun trigger changed");
            self.mark_all_known(projects, state);
            files.insert(path.to_path_buf());
            return files;
        }

        let owners: Vec<&TestProject> = projects.iter().filter(|p| p.has_module(path)).collect();

        if owners.is_empty() {
            if is_known_test_file(path, projects, state) {
                self.changed_tests.insert(path.to_path_buf());
                files.insert(path.to_path_buf());
            } else if projects.iter().any(TestProject::graph_overflowed) {
                tracing::debug!(
                    target: "watch",
                    path = %path.display(),
                    "module graph is incomplete, rerunning every known test file"
                );
                self.mark_all_known(projects, state);
                files.insert(path.to_path_buf());
            } else {
                tracing::debug!(
                    target: "watch",
                    path = %path.display(),
                    "no module graph knows this file"
                );
            }
            return files;
        }

        for project in owners {
            self.invalidates.insert(path.to_path_buf());
            project.invalidate_module(path);

            if state.has_file(path) || project.is_cached_test_file(path) {
                self.changed_tests.insert(path.to_path_buf());
                files.insert(path.to_path_buf());
                continue;
            }

            let mut rerun = false;
            for importer in project.importers_of(path) {
                let Some(importer) = importer.file() else {
                    continue;
                };
                let found = self.handle_file_changed(importer, projects, state);
                if !found.is_empty() {
                    rerun = true;
                    files.extend(found);
                }
            }
            if rerun {
                files.insert(path.to_path_buf());
            }
        }

        files
    }

    /// A module changed on disk. Returns whether a rerun should be scheduled.
    pub fn on_change(
        &mut self,
        path: &Path,
        projects: &[TestProject],
        state: &StateManager,
    ) -> bool {
        let path = slash(path);
        invalidate_everywhere(&path, projects);
        !self.handle_file_changed(&path, projects, state).is_empty()
    }

    /// A file appeared. New test files are queued directly; anything else is
    /// treated as a change, since watchers report rewrites as adds too.
    pub fn on_add(
        &mut self,
        path: &Path,
        projects: &mut [TestProject],
        state: &StateManager,
    ) -> bool {
        let path = slash(path);
        invalidate_everywhere(&path, projects);

        let mut matched = false;
        for project in projects.iter_mut().filter(|p| p.is_target_file(&path)) {
            project.mark_test_file(&path);
            matched = true;
        }
        if matched {
            self.changed_tests.insert(path);
            return true;
        }

        !self.handle_file_changed(&path, projects, state).is_empty()
    }

    /// A file disappeared. Returns whether it was a known test file, run or
    /// only globbed, which is then forgotten by every project and the state
    /// manager.
    pub fn on_unlink(
        &mut self,
        path: &Path,
        projects: &mut [TestProject],
        state: &mut StateManager,
    ) -> bool {
        let path = slash(path);
        self.invalidates.insert(path.clone());

        if !is_known_test_file(&path, projects, state) {
            return false;
        }
        for project in projects.iter_mut() {
            project.remove_cached_test_file(&path);
        }
        state.remove_file(&path);
        self.changed_tests.remove(&path);
        tracing::info!(target: "watch", path = %path.display(), "test file removed");
        true
    }

    fn mark_all_known(&mut self, projects: &[TestProject], state: &StateManager) {
        self.changed_tests.extend(state.get_filepaths());
        for project in projects {
            self.changed_tests
                .extend(project.cached_test_files().map(Path::to_path_buf));
        }
    }
}

fn is_known_test_file(path: &Path, projects: &[TestProject], state: &StateManager) -> bool {
    state.has_file(path) || projects.iter().any(|p| p.is_cached_test_file(path))
}

fn invalidate_everywhere(path: &Path, projects: &[TestProject]) {
    for project in projects {
        project.invalidate_module(path);
    }
}

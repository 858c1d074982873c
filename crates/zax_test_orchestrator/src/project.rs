//! Test projects.
//!
//! A project owns its test-file globs, its module graph handle and the cache
//! of test files it has discovered. Paths are compared in canonical form, the
//! same form the watcher and the graph use.

use crate::config::{compile_globs, ConfigError, ProjectConfig};
use crate::graph::{GraphNode, SharedModuleGraph};
use crate::normalize::path::relative_slash;
use globset::{Glob, GlobMatcher, GlobSet};
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

/// One test file scheduled within one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpecification {
    pub filepath: PathBuf,
    pub project_name: String,
    pub project_root: PathBuf,
    pub pool: String,
    /// Only tests declared on these lines run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_lines: Option<Vec<u32>>,
}

pub struct TestProject {
    name: String,
    root: PathBuf,
    pool: String,
    include: GlobSet,
    exclude: GlobSet,
    environment: String,
    environment_match_globs: Vec<(GlobMatcher, String)>,
    graph: SharedModuleGraph,
    test_files: BTreeSet<PathBuf>,
}

impl TestProject {
    /// Builds a project rooted at `config.root` (relative to `workspace_root`).
    pub fn from_config(
        config: &ProjectConfig,
        workspace_root: &Path,
        graph: SharedModuleGraph,
    ) -> Result<Self, ConfigError> {
        let root = config
            .root
            .as_ref()
            .map_or_else(|| workspace_root.to_path_buf(), |r| workspace_root.join(r));
        let root = root.canonicalize().unwrap_or(root);

        let environment_match_globs = config
            .environment_match_globs
            .iter()
            .map(|(glob, env)| -> Result<_, ConfigError> {
                Ok((Glob::new(glob)?.compile_matcher(), env.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: config.name.clone(),
            root,
            pool: config.pool.clone(),
            include: compile_globs(&config.include)?,
            exclude: compile_globs(&config.exclude)?,
            environment: config.environment.clone(),
            environment_match_globs,
            graph,
            test_files: BTreeSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Whether `path` matches the include globs and none of the excludes.
    pub fn is_target_file(&self, path: &Path) -> bool {
        if !path.starts_with(&self.root) {
            return false;
        }
        let relative = relative_slash(&self.root, path);
        self.include.is_match(&relative) && !self.exclude.is_match(&relative)
    }

    pub fn is_cached_test_file(&self, path: &Path) -> bool {
        self.test_files.contains(path)
    }

    pub fn mark_test_file(&mut self, path: &Path) {
        self.test_files.insert(path.to_path_buf());
    }

    pub fn remove_cached_test_file(&mut self, path: &Path) -> bool {
        self.test_files.remove(path)
    }

    pub fn cached_test_files(&self) -> impl Iterator<Item = &Path> {
        self.test_files.iter().map(PathBuf::as_path)
    }

    /// Walks the project root for test files and refreshes the cache.
    pub fn glob_test_files(&mut self) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .build();

        let mut files: Vec<PathBuf> = walker
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| entry.path().canonicalize().ok())
            .filter(|path| self.is_target_file(path))
            .collect();
        files.sort();

        self.test_files = files.iter().cloned().collect();
        tracing::debug!(
            target: "watch",
            project = %self.name,
            files = files.len(),
            "globbed test files"
        );
        files
    }

    pub fn create_specification(
        &self,
        filepath: PathBuf,
        test_lines: Option<Vec<u32>>,
    ) -> TestSpecification {
        TestSpecification {
            filepath,
            project_name: self.name.clone(),
            project_root: self.root.clone(),
            pool: self.pool.clone(),
            test_lines,
        }
    }

    /// Environment configured for `path` by glob, or the project default.
    pub fn environment_for(&self, path: &Path) -> &str {
        let relative = relative_slash(&self.root, path);
        self.environment_match_globs
            .iter()
            .find(|(glob, _)| glob.is_match(&relative))
            .map_or(self.environment.as_str(), |(_, env)| env.as_str())
    }

    pub fn has_module(&self, path: &Path) -> bool {
        self.graph
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    pub fn importers_of(&self, path: &Path) -> Vec<GraphNode> {
        self.graph
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .importers_of(path)
    }

    pub fn invalidate_module(&self, path: &Path) {
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate_module(path);
    }

    /// Modules of this project's graph gone stale since the last run.
    pub fn take_invalidated_modules(&self) -> Vec<PathBuf> {
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take_invalidated()
    }

    pub fn graph_overflowed(&self) -> bool {
        self.graph
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_overflow()
    }
}

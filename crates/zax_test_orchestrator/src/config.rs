//! Orchestrator configuration.
//!
//! Read from `zax.test.json` at the workspace root. Every field has a
//! default, so a missing file or a partial one is valid.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file name looked up in the workspace root.
pub const CONFIG_FILE: &str = "zax.test.json";
/// Debounce window for watch-mode reruns.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Errors that can occur while loading or compiling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),
    #[error("invalid test name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub root: PathBuf,
    pub allow_only: bool,
    pub test_name_pattern: Option<String>,
    pub setup_files: Vec<PathBuf>,
    pub force_rerun_triggers: Vec<String>,
    pub cache_dir: Option<PathBuf>,
    pub watch: WatchConfig,
    pub projects: Vec<ProjectConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            allow_only: false,
            test_name_pattern: None,
            setup_files: Vec::new(),
            force_rerun_triggers: vec![
                "**/package.json".into(),
                "**/{vitest,vite}.config.*".into(),
            ],
            cache_dir: None,
            watch: WatchConfig::default(),
            projects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
    /// Extra globs ignored by the watcher, on top of `.gitignore`.
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub name: String,
    /// Project root, relative to the workspace root.
    pub root: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub environment: String,
    /// `(glob, environment)` pairs, first match wins.
    pub environment_match_globs: Vec<(String, String)>,
    pub pool: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            root: None,
            include: vec!["**/*.{test,spec}.{ts,tsx,js,jsx,mts,mjs,cts,cjs}".into()],
            exclude: vec![
                "**/node_modules/**".into(),
                "**/dist/**".into(),
                "**/.git/**".into(),
            ],
            environment: "node".into(),
            environment_match_globs: Vec::new(),
            pool: "forks".into(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads `zax.test.json` from `workspace_root`, falling back to defaults.
    ///
    /// `root` is always resolved against the workspace root.
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        let path = workspace_root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Self::from_json(&content)?
        } else {
            Self::default()
        };
        config.root = workspace_root.join(&config.root);
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Projects to build; a single default project when none are configured.
    pub fn project_configs(&self) -> Vec<ProjectConfig> {
        if self.projects.is_empty() {
            vec![ProjectConfig::default()]
        } else {
            self.projects.clone()
        }
    }

    pub fn force_rerun_globs(&self) -> Result<GlobSet, ConfigError> {
        compile_globs(&self.force_rerun_triggers)
    }

    pub fn name_pattern(&self) -> Result<Option<Regex>, ConfigError> {
        self.test_name_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Results cache directory, relative paths resolved against `root`.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .as_ref()
            .map_or_else(|| self.root.join("node_modules/.zax"), |dir| self.root.join(dir))
    }
}

/// Compiles a list of globs into one matcher.
pub fn compile_globs(globs: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(Glob::new(glob)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.root, dir.path());
        assert!(!config.allow_only);
        assert_eq!(config.watch.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.project_configs().len(), 1);
        assert_eq!(config.project_configs()[0].environment, "node");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"allowOnly": true, "watch": {"debounceMs": 250}, "projects": [{"name": "web", "environment": "jsdom"}]}"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();

        assert!(config.allow_only);
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].name, "web");
        assert_eq!(config.projects[0].environment, "jsdom");
        assert_eq!(config.projects[0].pool, "forks");
        assert!(!config.projects[0].include.is_empty());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();
        assert!(matches!(
            OrchestratorConfig::load(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn default_force_triggers_match_package_json_and_configs() {
        let globs = OrchestratorConfig::default().force_rerun_globs().unwrap();
        assert!(globs.is_match("/ws/package.json"));
        assert!(globs.is_match("/ws/packages/web/vitest.config.ts"));
        assert!(globs.is_match("/ws/vite.config.mjs"));
        assert!(!globs.is_match("/ws/src/config.ts"));
    }

    #[test]
    fn name_pattern_compiles_and_rejects_invalid() {
        let mut config = OrchestratorConfig::default();
        assert!(config.name_pattern().unwrap().is_none());

        config.test_name_pattern = Some("^math".into());
        assert!(config.name_pattern().unwrap().unwrap().is_match("math adds"));

        config.test_name_pattern = Some("(".into());
        assert!(matches!(config.name_pattern(), Err(ConfigError::Pattern(_))));
    }

    #[test]
    fn invalid_glob_is_reported() {
        assert!(matches!(
            compile_globs(&["a/{b".to_string()]),
            Err(ConfigError::Glob(_))
        ));
    }
}

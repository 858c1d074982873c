//! Test environment grouping.
//!
//! A file picks its environment with a `@vitest-environment` (or
//! `@jest-environment`) docblock comment; otherwise its project decides.

use crate::project::TestSpecification;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

static ENVIRONMENT: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
static ENVIRONMENT_OPTIONS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid environment options in {path}: {source}")]
    Options {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid environment pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Environment a file runs in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Environment {
    pub name: String,
    /// Options keyed by environment (`happyDOM` for `happy-dom`).
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    pub spec: TestSpecification,
    pub environment: Environment,
}

/// Specs grouped by environment name.
pub type EnvironmentGroups = BTreeMap<String, Vec<EnvironmentSpec>>;

fn pattern(
    cell: &'static OnceLock<Result<Regex, regex::Error>>,
    source: &str,
) -> Result<&'static Regex, EnvError> {
    cell.get_or_init(|| Regex::new(source))
        .as_ref()
        .map_err(|e| EnvError::Pattern(e.clone()))
}

/// Reads the environment of a file from its source, defaulting to
/// `fallback`. `Ok(None)` options means no options comment.
pub fn resolve_environment(
    code: &str,
    fallback: &str,
) -> Result<(String, Option<String>), EnvError> {
    let env_re = pattern(&ENVIRONMENT, r"@(?:vitest|jest)-environment\s+([\w-]+)\b")?;
    let options_re = pattern(&ENVIRONMENT_OPTIONS, r"@(?:vitest|jest)-environment-options\s+(.+)")?;

    let name = env_re
        .captures(code)
        .and_then(|c| c.get(1))
        .map_or_else(|| fallback.to_string(), |m| m.as_str().to_string());

    let options = options_re.captures(code).and_then(|c| c.get(1)).map(|m| {
        let raw = m.as_str();
        raw.strip_suffix("*/").unwrap_or(raw).to_string()
    });

    Ok((name, options))
}

fn environment_key(name: &str) -> &str {
    if name == "happy-dom" {
        "happyDOM"
    } else {
        name
    }
}

/// Groups `specs` by the environment each file declares, falling back to
/// `fallback(spec)`.
pub async fn group_files_by_env<F>(
    specs: &[TestSpecification],
    fallback: F,
) -> Result<EnvironmentGroups, EnvError>
where
    F: Fn(&TestSpecification) -> String,
{
    let mut groups = EnvironmentGroups::new();

    for spec in specs {
        let code = tokio::fs::read_to_string(&spec.filepath)
            .await
            .map_err(|source| EnvError::Read {
                path: spec.filepath.clone(),
                source,
            })?;

        let (name, raw_options) = resolve_environment(&code, &fallback(spec))?;
        let options = match raw_options {
            Some(raw) => {
                let parsed: Value =
                    serde_json::from_str(&raw).map_err(|source| EnvError::Options {
                        path: spec.filepath.clone(),
                        source,
                    })?;
                (!parsed.is_null()).then(|| {
                    let mut keyed = Map::new();
                    keyed.insert(environment_key(&name).to_string(), parsed);
                    Value::Object(keyed)
                })
            }
            None => None,
        };

        tracing::trace!(
            target: "collect",
            file = %spec.filepath.display(),
            environment = %name,
            "environment"
        );
        groups.entry(name.clone()).or_default().push(EnvironmentSpec {
            spec: spec.clone(),
            environment: Environment { name, options },
        });
    }

    Ok(groups)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn spec(path: &Path) -> TestSpecification {
        TestSpecification {
            filepath: path.to_path_buf(),
            project_name: String::new(),
            project_root: PathBuf::from("/"),
            pool: "forks".into(),
            test_lines: None,
        }
    }

    #[test]
    fn docblock_wins_over_fallback() {
        let code = "/**\n * @vitest-environment jsdom\n */\ntest('a', () => {})";
        assert_eq!(resolve_environment(code, "node").unwrap(), ("jsdom".into(), None));

        let code = "// @jest-environment happy-dom";
        assert_eq!(resolve_environment(code, "node").unwrap().0, "happy-dom");

        assert_eq!(resolve_environment("test('a')", "edge").unwrap().0, "edge");
    }

    #[test]
    fn options_comment_is_not_an_environment() {
        let code = "/* @vitest-environment-options {\"url\": \"http://x\"} */";
        let (name, options) = resolve_environment(code, "node").unwrap();
        assert_eq!(name, "node");
        assert_eq!(options.as_deref(), Some("{\"url\": \"http://x\"} "));
    }

    #[tokio::test]
    async fn groups_by_environment_with_keyed_options() {
        let dir = tempdir().unwrap();
        let dom = dir.path().join("dom.test.ts");
        let plain = dir.path().join("plain.test.ts");
        let happy = dir.path().join("happy.test.ts");
        fs::write(&dom, "// @vitest-environment jsdom\n").unwrap();
        fs::write(&plain, "test('x', () => {})\n").unwrap();
        fs::write(
            &happy,
            concat!(
                "/**\n * @vitest-environment happy-dom\n",
                " * @vitest-environment-options {\"width\": 800} */\n",
            ),
        )
        .unwrap();

        let groups = group_files_by_env(&[spec(&dom), spec(&plain), spec(&happy)], |_| {
            "node".to_string()
        })
        .await
        .unwrap();

        assert_eq!(groups.keys().cloned().collect::<Vec<_>>(), vec!["happy-dom", "jsdom", "node"]);
        assert_eq!(groups["node"][0].spec.filepath, plain);
        assert_eq!(groups["jsdom"][0].environment.options, None);
        assert_eq!(
            groups["happy-dom"][0].environment.options,
            Some(json!({"happyDOM": {"width": 800}}))
        );
    }

    #[tokio::test]
    async fn invalid_options_and_missing_files_are_errors() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.test.ts");
        fs::write(&broken, "// @vitest-environment-options {nope\n").unwrap();

        let error = group_files_by_env(&[spec(&broken)], |_| "node".into())
            .await
            .unwrap_err();
        assert!(matches!(error, EnvError::Options { .. }));

        let error = group_files_by_env(&[spec(&dir.path().join("gone.ts"))], |_| "node".into())
            .await
            .unwrap_err();
        assert!(matches!(error, EnvError::Read { .. }));
    }
}

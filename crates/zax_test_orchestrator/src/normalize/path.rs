//! Path normalization utilities for cross-platform consistency.
//!
//! Watch events, module graph nodes and collected files must agree on one
//! spelling of a path, so everything is compared in forward-slash form.

use std::path::{Path, PathBuf};

/// Normalizes a path string to use forward slashes only.
///
/// - Converts backslashes to forward slashes
/// - Collapses consecutive slashes
pub fn normalize_slashes(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut last_was_slash = false;

    for c in path.chars() {
        let is_slash = c == '/' || c == '\\';
        if is_slash {
            if !last_was_slash {
                result.push('/');
            }
            last_was_slash = true;
        } else {
            result.push(c);
            last_was_slash = false;
        }
    }
    result
}

/// Forward-slash form of `path`.
pub fn slash(path: &Path) -> PathBuf {
    PathBuf::from(normalize_slashes(&path.to_string_lossy()))
}

/// `path` relative to `root` in forward-slash form.
///
/// Paths outside `root` are returned whole.
pub fn relative_slash(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    normalize_slashes(&relative.to_string_lossy())
}

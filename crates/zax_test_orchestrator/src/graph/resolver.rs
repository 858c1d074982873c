//! Import specifier resolution using `oxc_resolver`.
//!
//! Handles tsconfig paths, package.json exports and the usual extension and
//! index-file probing.

use oxc_resolver::{
    ResolveOptions, Resolver, TsconfigDiscovery, TsconfigOptions, TsconfigReferences,
};
use std::path::{Path, PathBuf};

const MAX_SPECIFIER_LOG_LENGTH: usize = 256;

/// Extensions tried for extension-less specifiers, in order.
pub const MODULE_EXTENSIONS: &[&str] = &[
    ".ts", ".tsx", ".js", ".jsx", ".mts", ".mjs", ".cts", ".cjs",
];

pub struct PathResolver {
    resolver: Resolver,
    workspace_root: PathBuf,
}

impl PathResolver {
    /// Resolver for `workspace_root`, using its `tsconfig.json` when present.
    pub fn new(workspace_root: PathBuf) -> Self {
        let tsconfig_path = workspace_root.join("tsconfig.json");
        if tsconfig_path.exists() {
            Self::with_tsconfig(workspace_root, tsconfig_path)
        } else {
            Self::with_options(workspace_root, base_options())
        }
    }

    pub fn with_tsconfig(workspace_root: PathBuf, tsconfig_path: PathBuf) -> Self {
        let options = ResolveOptions {
            tsconfig: Some(TsconfigDiscovery::Manual(TsconfigOptions {
                config_file: tsconfig_path,
                references: TsconfigReferences::Disabled,
            })),
            ..base_options()
        };
        Self::with_options(workspace_root, options)
    }

    fn with_options(workspace_root: PathBuf, options: ResolveOptions) -> Self {
        let workspace_root = workspace_root.canonicalize().unwrap_or(workspace_root);
        Self {
            resolver: Resolver::new(options),
            workspace_root,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Resolve a specifier to a canonical path, wherever it lives.
    pub fn resolve_any(&self, from: &Path, specifier: &str) -> Option<PathBuf> {
        let from_dir = from.parent()?;
        let resolution = self.resolver.resolve(from_dir, specifier).ok()?;
        resolution.into_path_buf().canonicalize().ok()
    }

    /// Whether `path` is a workspace module rather than a dependency.
    pub fn is_internal(&self, path: &Path) -> bool {
        path.starts_with(&self.workspace_root)
            && !path
                .components()
                .any(|c| c.as_os_str() == "node_modules")
    }
}

fn base_options() -> ResolveOptions {
    ResolveOptions {
        extensions: MODULE_EXTENSIONS.iter().map(|e| (*e).into()).collect(),
        main_files: vec!["index".into()],
        condition_names: vec![
            "import".into(),
            "require".into(),
            "node".into(),
            "default".into(),
        ],
        ..Default::default()
    }
}

pub(crate) fn truncate_str(s: &str) -> &str {
    if s.len() <= MAX_SPECIFIER_LOG_LENGTH {
        return s;
    }
    let mut end = MAX_SPECIFIER_LOG_LENGTH;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

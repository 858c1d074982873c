//! Static import extraction using tree-sitter.
//!
//! Feeds the module graph with the specifiers a TS/JS module imports.

use std::path::Path;
use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

/// Maximum number of imports to extract per module.
const MAX_IMPORTS_PER_FILE: usize = 500;
/// Maximum path length for logging.
const MAX_PATH_LOG_LENGTH: usize = 256;

const IMPORT_QUERY: &str = r#"
    (import_statement source: (string) @source)
    (export_statement source: (string) @source)
    (call_expression
        function: (identifier) @func (#eq? @func "require")
        arguments: (arguments (string) @source))
    (call_expression
        function: (import)
        arguments: (arguments (string) @source))
"#;

/// Kind of import statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import { x } from './path'`
    Named,
    /// `import x from './path'`
    Default,
    /// `import * as x from './path'`
    Namespace,
    /// `import './path'`
    SideEffect,
    /// `export { x } from './path'`
    ReExportNamed,
    /// `export * from './path'`
    ReExportAll,
    /// `require('./path')`
    Require,
    /// `import('./path')`
    Dynamic,
    /// `import type { x } from './path'`
    TypeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    /// The import specifier (e.g., "./foo", "@/lib/bar", "lodash").
    pub specifier: String,
    pub kind: ImportKind,
}

/// Parse imports from a module on disk.
///
/// Returns an empty list when the file cannot be read or parsed.
pub fn parse_imports(path: &Path) -> Vec<ImportStatement> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn_parse_error(path, &format!("read error: {e}"));
            return Vec::new();
        }
    };
    parse_imports_from_str(&content, path)
}

pub fn parse_imports_from_str(content: &str, path: &Path) -> Vec<ImportStatement> {
    let mut parser = Parser::new();
    let language = language_for_path(path);
    if parser.set_language(&language).is_err() {
        warn_parse_error(path, "failed to set language");
        return Vec::new();
    }

    let Some(tree) = parser.parse(content, None) else {
        warn_parse_error(path, "parse returned None");
        return Vec::new();
    };

    let root = tree.root_node();
    if root.has_error() {
        warn_parse_error(path, "syntax errors in file");
        return Vec::new();
    }

    let mut imports = extract_imports(content, &language, root);

    if imports.len() > MAX_IMPORTS_PER_FILE {
        tracing::warn!(
            target: "affected",
            path = %truncate_path(path),
            count = imports.len(),
            limit = MAX_IMPORTS_PER_FILE,
            "too many imports, truncating"
        );
        imports.truncate(MAX_IMPORTS_PER_FILE);
    }

    imports
}

/// Grammar for a module path. `.tsx` and `.jsx` need the TSX dialect.
pub(crate) fn language_for_path(path: &Path) -> tree_sitter::Language {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "tsx" | "jsx" => tree_sitter_typescript::LANGUAGE_TSX.into(),
        _ => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    }
}

fn extract_imports(
    content: &str,
    language: &tree_sitter::Language,
    root: Node<'_>,
) -> Vec<ImportStatement> {
    let mut imports = Vec::new();

    let Ok(query) = Query::new(language, IMPORT_QUERY) else {
        return imports;
    };
    let Some(source_index) = query.capture_index_for_name("source") else {
        return imports;
    };

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, root, content.as_bytes());

    while let Some(m) = matches.next() {
        for capture in m.captures {
            if capture.index != source_index {
                continue;
            }
            if let Some(import) = import_from_source(content, capture.node) {
                imports.push(import);
            }
        }
    }

    imports
}

fn import_from_source(content: &str, source: Node<'_>) -> Option<ImportStatement> {
    let specifier = string_content(content, source)?;
    if specifier.is_empty() {
        return None;
    }

    let parent = source.parent()?;
    let kind = match parent.kind() {
        "import_statement" => classify_import_statement(content, parent),
        "export_statement" => classify_export_statement(content, parent),
        "arguments" => classify_call(parent),
        _ => ImportKind::Named,
    };

    Some(ImportStatement { specifier, kind })
}

fn string_content(content: &str, node: Node<'_>) -> Option<String> {
    let text = node.utf8_text(content.as_bytes()).ok()?;
    let trimmed = text.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    Some(trimmed.to_string())
}

fn classify_call(arguments: Node<'_>) -> ImportKind {
    let callee_kind = arguments
        .parent()
        .and_then(|call| call.child_by_field_name("function"))
        .map(|f| f.kind());
    match callee_kind {
        Some("import") => ImportKind::Dynamic,
        _ => ImportKind::Require,
    }
}

fn classify_import_statement(content: &str, node: Node<'_>) -> ImportKind {
    let text = node.utf8_text(content.as_bytes()).unwrap_or("");

    if text.starts_with("import type") {
        return ImportKind::TypeOnly;
    }
    if text.contains("* as") {
        return ImportKind::Namespace;
    }
    if text.contains('{') {
        return ImportKind::Named;
    }
    if !text.contains(" from ") {
        return ImportKind::SideEffect;
    }
    ImportKind::Default
}

fn classify_export_statement(content: &str, node: Node<'_>) -> ImportKind {
    let text = node.utf8_text(content.as_bytes()).unwrap_or("");

    if text.contains("export *") && !text.contains(" as ") {
        return ImportKind::ReExportAll;
    }
    ImportKind::ReExportNamed
}

fn warn_parse_error(path: &Path, reason: &str) {
    tracing::warn!(target: "affected", path = %truncate_path(path), reason, "parse error");
}

pub(crate) fn truncate_path(path: &Path) -> String {
    let s = path.display().to_string();
    if s.len() > MAX_PATH_LOG_LENGTH {
        let mut start = s.len() - MAX_PATH_LOG_LENGTH + 3;
        while !s.is_char_boundary(start) {
            start += 1;
        }
        format!("...{}", &s[start..])
    } else {
        s
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(content: &str) -> Vec<ImportStatement> {
        parse_imports_from_str(content, Path::new("test.ts"))
    }

    fn single(content: &str) -> ImportStatement {
        let imports = parse(content);
        assert_eq!(imports.len(), 1, "{content}");
        imports.into_iter().next().unwrap()
    }

    #[test]
    fn extracts_named_import() {
        let import = single("import { foo } from './bar';");
        assert_eq!(import.specifier, "./bar");
        assert_eq!(import.kind, ImportKind::Named);
    }

    #[test]
    fn extracts_default_and_namespace_imports() {
        assert_eq!(single("import foo from './bar';").kind, ImportKind::Default);
        assert_eq!(single("import * as foo from './bar';").kind, ImportKind::Namespace);
    }

    #[test]
    fn extracts_side_effect_import() {
        let import = single("import './setup';");
        assert_eq!(import.specifier, "./setup");
        assert_eq!(import.kind, ImportKind::SideEffect);
    }

    #[test]
    fn extracts_reexports() {
        assert_eq!(single("export { foo } from './bar';").kind, ImportKind::ReExportNamed);
        assert_eq!(single("export * from './bar';").kind, ImportKind::ReExportAll);
        assert_eq!(
            single("export * as ns from './bar';").kind,
            ImportKind::ReExportNamed
        );
    }

    #[test]
    fn extracts_require_and_dynamic_import() {
        let require = single("const foo = require('./bar');");
        assert_eq!(require.kind, ImportKind::Require);

        let dynamic = single("async function load() { return import('./lazy'); }");
        assert_eq!(dynamic.specifier, "./lazy");
        assert_eq!(dynamic.kind, ImportKind::Dynamic);
    }

    #[test]
    fn extracts_type_only_import() {
        let import = single("import type { Foo } from './bar';");
        assert_eq!(import.kind, ImportKind::TypeOnly);
    }

    #[test]
    fn extracts_jsx_module_with_tsx_grammar() {
        let imports = parse_imports_from_str(
            "import { render } from './render';\nconst el = <div>hi</div>;",
            Path::new("view.test.jsx"),
        );
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].specifier, "./render");
    }

    #[test]
    fn handles_syntax_errors_gracefully() {
        assert!(parse("import { from './bar'").is_empty());
    }

    #[test]
    fn truncates_at_limit() {
        let mut content = String::new();
        for i in 0..=MAX_IMPORTS_PER_FILE {
            content.push_str(&format!("import {{ x{i} }} from './m{i}';\n"));
        }
        assert_eq!(parse(&content).len(), MAX_IMPORTS_PER_FILE);
    }

    #[test]
    fn truncate_path_keeps_tail() {
        assert_eq!(truncate_path(&PathBuf::from("/short/path.ts")), "/short/path.ts");

        let result = truncate_path(&PathBuf::from("a".repeat(300)));
        assert!(result.starts_with("..."));
        assert!(result.len() <= MAX_PATH_LOG_LENGTH);
    }
}

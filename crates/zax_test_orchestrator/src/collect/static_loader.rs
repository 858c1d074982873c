//! Registration calls read straight from source.
//!
//! Lists the tests of a file without executing it: `describe`/`test` calls
//! are found in the syntax tree and replayed onto the collect context.
//! Conditions of `.skipIf`/`.runIf` cannot be evaluated statically, so those
//! registrations are listed as runnable. `.each` tables are listed once under
//! their title template.

use super::{CollectContext, CollectError, ModuleLoader, SuiteCollector, TaskOptions};
use crate::graph::parser::language_for_path;
use crate::task::{Hook, HookKind};
use std::future::Future;
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Reads registrations from TS/JS source with tree-sitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticModuleLoader;

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self
    }

    /// Replays the registrations found in `source` onto `ctx`.
    pub fn load_source(
        &self,
        source: &str,
        filepath: &Path,
        ctx: &mut CollectContext,
    ) -> Result<(), CollectError> {
        let mut parser = Parser::new();
        parser
            .set_language(&language_for_path(filepath))
            .map_err(|e| CollectError::Load {
                path: filepath.to_path_buf(),
                message: e.to_string(),
            })?;
        let tree = parser.parse(source, None).ok_or_else(|| CollectError::Load {
            path: filepath.to_path_buf(),
            message: "parser returned no tree".into(),
        })?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error(root).map_or(1, line_of);
            return Err(CollectError::Syntax {
                path: filepath.to_path_buf(),
                line,
            });
        }

        let walker = Walker { source };
        walker.visit(root, ctx.suite());
        Ok(())
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(
        &self,
        filepath: &Path,
        ctx: &mut CollectContext,
    ) -> impl Future<Output = Result<(), CollectError>> + Send {
        async move {
            let source =
                tokio::fs::read_to_string(filepath)
                    .await
                    .map_err(|e| CollectError::Load {
                        path: filepath.to_path_buf(),
                        message: e.to_string(),
                    })?;
            self.load_source(&source, filepath, ctx)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registrar {
    Suite,
    Test,
    Hook(HookKind),
}

/// A recognised callee such as `describe.skip` or `test.skipIf(cond)`.
#[derive(Debug, Clone, Copy)]
struct Callee {
    registrar: Registrar,
    options: TaskOptions,
}

struct Walker<'s> {
    source: &'s str,
}

impl Walker<'_> {
    fn visit(&self, node: Node<'_>, suite: &mut SuiteCollector) {
        if node.kind() == "call_expression" {
            if let Some(callee) = node
                .child_by_field_name("function")
                .and_then(|f| self.callee(f))
            {
                self.register(node, callee, suite);
                return;
            }
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.visit(child, suite);
        }
    }

    fn register(&self, call: Node<'_>, callee: Callee, suite: &mut SuiteCollector) {
        let position = call.start_position();
        let (line, column) = (to_u32(position.row) + 1, to_u32(position.column) + 1);
        let args = self.arguments(call);
        // `test(name, fn)` or `test(name, options, fn)`
        let body = args.iter().skip(1).copied().find(|n| is_function(*n));

        match callee.registrar {
            Registrar::Hook(kind) => {
                let mut hook = Hook::new(hook_label(kind));
                hook.location = Some(crate::task::Location { line, column });
                suite.hook(kind, hook);
            }
            Registrar::Test => {
                let mut options = callee.options.at(line, column);
                if body.is_none() {
                    options = options.without_body();
                }
                let name = args.first().map(|n| self.title(*n)).unwrap_or_default();
                suite.test_with(name, options);
            }
            Registrar::Suite => {
                let mut options = callee.options.at(line, column);
                if body.is_none() {
                    options = options.without_body();
                }
                let name = args.first().map(|n| self.title(*n)).unwrap_or_default();
                let mut child = SuiteCollector::new(name, options);
                if let Some(body) = body.and_then(|b| b.child_by_field_name("body")) {
                    self.visit(body, &mut child);
                }
                suite.add_suite(child);
            }
        }
    }

    fn callee(&self, node: Node<'_>) -> Option<Callee> {
        match node.kind() {
            "identifier" => {
                let registrar = match self.text(node) {
                    "describe" | "suite" => Registrar::Suite,
                    "test" | "it" | "bench" => Registrar::Test,
                    "beforeAll" => Registrar::Hook(HookKind::BeforeAll),
                    "afterAll" => Registrar::Hook(HookKind::AfterAll),
                    "beforeEach" => Registrar::Hook(HookKind::BeforeEach),
                    "afterEach" => Registrar::Hook(HookKind::AfterEach),
                    _ => return None,
                };
                Some(Callee {
                    registrar,
                    options: TaskOptions::new(),
                })
            }
            "member_expression" => {
                let mut callee = self.callee(node.child_by_field_name("object")?)?;
                if matches!(callee.registrar, Registrar::Hook(_)) {
                    return None;
                }
                let property = node.child_by_field_name("property")?;
                callee.options = match self.text(property) {
                    "only" => callee.options.only(),
                    "skip" => callee.options.skip(),
                    "todo" => callee.options.todo(),
                    "concurrent" | "sequential" | "fails" | "shuffle" => callee.options,
                    // `skipIf`, `each`, `extend` and friends return a new
                    // registrar; calling them registers nothing.
                    _ => return None,
                };
                Some(callee)
            }
            // `test.skipIf(cond)(...)`, `describe.each(table)(...)`
            "call_expression" => {
                let function = node.child_by_field_name("function")?;
                if function.kind() != "member_expression" {
                    return None;
                }
                let property = function.child_by_field_name("property")?;
                if !matches!(self.text(property), "skipIf" | "runIf" | "each" | "for") {
                    return None;
                }
                self.callee(function.child_by_field_name("object")?)
            }
            _ => None,
        }
    }

    fn arguments<'t>(&self, call: Node<'t>) -> Vec<Node<'t>> {
        let Some(arguments) = call.child_by_field_name("arguments") else {
            return Vec::new();
        };
        let mut cursor = arguments.walk();
        let args = arguments
            .named_children(&mut cursor)
            .filter(|n| n.kind() != "comment")
            .collect();
        args
    }

    /// String literals lose their quotes; anything else is kept verbatim.
    fn title(&self, node: Node<'_>) -> String {
        let text = self.text(node);
        match node.kind() {
            "string" | "template_string" => text
                .trim_matches(|c| c == '"' || c == '\'' || c == '`')
                .to_string(),
            _ => text.to_string(),
        }
    }

    fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

fn is_function(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function"
    )
}

fn hook_label(kind: HookKind) -> &'static str {
    match kind {
        HookKind::BeforeAll => "beforeAll",
        HookKind::AfterAll => "afterAll",
        HookKind::BeforeEach => "beforeEach",
        HookKind::AfterEach => "afterEach",
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(first_error)
}

fn line_of(node: Node<'_>) -> u32 {
    to_u32(node.start_position().row) + 1
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

//! Snippet compilation: parse, import resolution with inference, and name
//! resolution.
//!
//! Imports resolve only against the declared roots set: `std.<ns>` for the
//! builtin namespaces and `api.<slug>` for configured services; anything
//! outside the allow-list is rejected. Before unresolved names are reported,
//! an import-inference pass adds missing `use std.<ns>;` declarations for
//! the known builtin namespaces, so a snippet that merely forgot
//! `use std.json;` compiles on the spot.

use std::collections::BTreeSet;

use super::lang::{self, Diagnostic, Expr, Program, Stmt, UseDecl};

/// Builtin namespaces importable under `std.`.
pub const STD_NAMESPACES: [&str; 5] = ["json", "list", "text", "math", "log"];

/// Result of a compile attempt; diagnostics are complete, not first-only.
#[derive(Clone, Debug)]
pub struct CompileOutcome {
    pub success: bool,
    pub errors: Vec<Diagnostic>,
}

/// A successfully compiled snippet, ready for the sandbox.
#[derive(Clone, Debug)]
pub struct CompiledSnippet {
    pub qualified_name: String,
    pub program: Program,
    /// Imported builtin namespaces (after inference).
    pub std_namespaces: BTreeSet<String>,
    /// Imported service slugs.
    pub services: BTreeSet<String>,
}

pub struct Compiler {
    known_services: BTreeSet<String>,
}

impl Compiler {
    pub fn new(known_services: impl IntoIterator<Item = String>) -> Self {
        Self {
            known_services: known_services.into_iter().collect(),
        }
    }

    /// Compiles `source` under `qualified_name`.
    ///
    /// `input_vars` are the names pre-bound by the orchestrator;
    /// `output_vars` are the only legal `out` targets.
    pub fn compile(
        &self,
        qualified_name: &str,
        source: &str,
        input_vars: &[String],
        output_vars: &[String],
    ) -> Result<CompiledSnippet, Vec<Diagnostic>> {
        let mut program = match lang::parse(source) {
            Ok(program) => program,
            Err(errors) => return Err(errors),
        };

        let mut errors = Vec::new();
        let mut std_namespaces = BTreeSet::new();
        let mut services = BTreeSet::new();

        for decl in &program.uses {
            self.resolve_import(decl, &mut std_namespaces, &mut services, &mut errors);
        }

        // Import inference: referenced builtin namespaces get their import
        // added instead of an unresolved-name diagnostic.
        let referenced = collect_root_idents(&program);
        for ns in STD_NAMESPACES {
            if referenced.contains(ns) && !std_namespaces.contains(ns) {
                std_namespaces.insert(ns.to_string());
                program.uses.push(UseDecl {
                    path: vec!["std".to_string(), ns.to_string()],
                    span: lang::Span { line: 1, column: 1 },
                });
            }
        }

        self.resolve_names(
            &program,
            input_vars,
            output_vars,
            &std_namespaces,
            &services,
            &mut errors,
        );

        if errors.is_empty() {
            Ok(CompiledSnippet {
                qualified_name: qualified_name.to_string(),
                program,
                std_namespaces,
                services,
            })
        } else {
            Err(errors)
        }
    }

    /// Compile-check without keeping the unit: `{success, errors}` with the
    /// full diagnostic list.
    pub fn check(
        &self,
        qualified_name: &str,
        source: &str,
        input_vars: &[String],
        output_vars: &[String],
    ) -> CompileOutcome {
        match self.compile(qualified_name, source, input_vars, output_vars) {
            Ok(_) => CompileOutcome {
                success: true,
                errors: vec![],
            },
            Err(errors) => CompileOutcome {
                success: false,
                errors,
            },
        }
    }

    fn resolve_import(
        &self,
        decl: &UseDecl,
        std_namespaces: &mut BTreeSet<String>,
        services: &mut BTreeSet<String>,
        errors: &mut Vec<Diagnostic>,
    ) {
        let err = |message: String| Diagnostic {
            line: decl.span.line,
            column: decl.span.column,
            message,
        };
        if decl.path.len() != 2 {
            errors.push(err(format!(
                "import `{}` must have the form `use std.<ns>;` or `use api.<service>;`",
                decl.path.join(".")
            )));
            return;
        }
        match decl.root() {
            "std" => {
                let ns = decl.binding();
                if STD_NAMESPACES.contains(&ns) {
                    std_namespaces.insert(ns.to_string());
                } else {
                    errors.push(err(format!("unknown std namespace `{ns}`")));
                }
            }
            "api" => {
                let slug = decl.binding();
                if self.known_services.contains(slug) {
                    services.insert(slug.to_string());
                } else {
                    errors.push(err(format!("unknown service `{slug}`")));
                }
            }
            other => errors.push(err(format!(
                "import root `{other}` is outside the allowed roots (std, api)"
            ))),
        }
    }

    fn resolve_names(
        &self,
        program: &Program,
        input_vars: &[String],
        output_vars: &[String],
        std_namespaces: &BTreeSet<String>,
        services: &BTreeSet<String>,
        errors: &mut Vec<Diagnostic>,
    ) {
        let mut bound: BTreeSet<String> = input_vars.iter().cloned().collect();
        bound.extend(std_namespaces.iter().cloned());
        bound.extend(services.iter().cloned());
        let outputs: BTreeSet<&str> = output_vars.iter().map(String::as_str).collect();

        let mut scope = Scope {
            bound,
            outputs,
            errors,
        };
        for stmt in &program.stmts {
            scope.check_stmt(stmt);
        }
    }
}

struct Scope<'a> {
    bound: BTreeSet<String>,
    outputs: BTreeSet<&'a str>,
    errors: &'a mut Vec<Diagnostic>,
}

impl Scope<'_> {
    fn error(&mut self, span: lang::Span, message: String) {
        self.errors.push(Diagnostic {
            line: span.line,
            column: span.column,
            message,
        });
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, expr, .. } => {
                self.check_expr(expr);
                self.bound.insert(name.clone());
            }
            Stmt::Out { name, expr, span } => {
                self.check_expr(expr);
                if !self.outputs.contains(name.as_str()) {
                    self.error(
                        *span,
                        format!("`out {name}` is not among the step's declared outputs"),
                    );
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                self.check_expr(cond);
                // Block-local bindings stay local.
                let saved = self.bound.clone();
                for s in then {
                    self.check_stmt(s);
                }
                self.bound = saved.clone();
                for s in otherwise {
                    self.check_stmt(s);
                }
                self.bound = saved;
            }
            Stmt::For {
                var, iter, body, ..
            } => {
                self.check_expr(iter);
                let saved = self.bound.clone();
                self.bound.insert(var.clone());
                for s in body {
                    self.check_stmt(s);
                }
                self.bound = saved;
            }
            Stmt::Fail { expr, .. } | Stmt::Expr { expr, .. } => self.check_expr(expr),
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident(name, span) => {
                if !self.bound.contains(name) {
                    self.error(*span, format!("unresolved name `{name}`"));
                }
            }
            Expr::Field { object, .. } => self.check_expr(object),
            Expr::Index { object, index, .. } => {
                self.check_expr(object);
                self.check_expr(index);
            }
            Expr::Call { callee, args, .. } => {
                self.check_expr(callee);
                for arg in args {
                    self.check_expr(arg);
                }
            }
            Expr::Unary { expr, .. } => self.check_expr(expr),
            Expr::Binary { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            Expr::Object { fields, .. } => {
                for (_, value) in fields {
                    self.check_expr(value);
                }
            }
            Expr::Array { items, .. } => {
                for item in items {
                    self.check_expr(item);
                }
            }
            _ => {}
        }
    }
}

/// Root identifiers referenced anywhere in the program (for inference).
fn collect_root_idents(program: &Program) -> BTreeSet<String> {
    fn walk_expr(expr: &Expr, into: &mut BTreeSet<String>) {
        match expr {
            Expr::Ident(name, _) => {
                into.insert(name.clone());
            }
            Expr::Field { object, .. } => walk_expr(object, into),
            Expr::Index { object, index, .. } => {
                walk_expr(object, into);
                walk_expr(index, into);
            }
            Expr::Call { callee, args, .. } => {
                walk_expr(callee, into);
                for arg in args {
                    walk_expr(arg, into);
                }
            }
            Expr::Unary { expr, .. } => walk_expr(expr, into),
            Expr::Binary { left, right, .. } => {
                walk_expr(left, into);
                walk_expr(right, into);
            }
            Expr::Object { fields, .. } => {
                for (_, value) in fields {
                    walk_expr(value, into);
                }
            }
            Expr::Array { items, .. } => {
                for item in items {
                    walk_expr(item, into);
                }
            }
            _ => {}
        }
    }

    fn walk_stmt(stmt: &Stmt, into: &mut BTreeSet<String>) {
        match stmt {
            Stmt::Let { expr, .. }
            | Stmt::Out { expr, .. }
            | Stmt::Fail { expr, .. }
            | Stmt::Expr { expr, .. } => walk_expr(expr, into),
            Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                walk_expr(cond, into);
                for s in then.iter().chain(otherwise) {
                    walk_stmt(s, into);
                }
            }
            Stmt::For { iter, body, .. } => {
                walk_expr(iter, into);
                for s in body {
                    walk_stmt(s, into);
                }
            }
        }
    }

    let mut idents = BTreeSet::new();
    for stmt in &program.stmts {
        walk_stmt(stmt, &mut idents);
    }
    idents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> Compiler {
        Compiler::new(["acme".to_string()])
    }

    const SNIPPET: &str = r#"
use api.acme;
use std.json;
let res = acme.call("query", { "body": params });
out total = json.get(res.body, "total");
"#;

    /// **Scenario**: a well-formed snippet compiles with its imports recorded.
    #[test]
    fn compiles_well_formed_snippet() {
        let compiled = compiler()
            .compile("steps.Total", SNIPPET, &["params".to_string()], &["total".to_string()])
            .unwrap();
        assert!(compiled.services.contains("acme"));
        assert!(compiled.std_namespaces.contains("json"));
    }

    /// **Scenario**: a snippet missing `use std.json;` compiles anyway -
    /// import inference adds the known namespace.
    #[test]
    fn infers_missing_std_import() {
        let src = SNIPPET.replace("use std.json;\n", "");
        let compiled = compiler()
            .compile("steps.Total", &src, &["params".to_string()], &["total".to_string()])
            .unwrap();
        assert!(compiled.std_namespaces.contains("json"));
        assert!(compiled
            .program
            .uses
            .iter()
            .any(|u| u.path == vec!["std", "json"]));
    }

    /// **Scenario**: an unresolvable symbol stays a diagnostic with position;
    /// inference never invents non-builtin names.
    #[test]
    fn unresolved_symbol_reported() {
        let src = "out total = frobnicate(1);\n";
        let errors = compiler()
            .compile("steps.T", src, &[], &["total".to_string()])
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unresolved name `frobnicate`"));
        assert_eq!(errors[0].line, 1);
    }

    /// **Scenario**: imports outside the allowed roots are rejected -
    /// filesystem-style roots never resolve.
    #[test]
    fn disallowed_roots_rejected() {
        let errors = compiler()
            .compile("steps.T", "use fs.read;\nout x = 1;\n", &[], &["x".to_string()])
            .unwrap_err();
        assert!(errors[0].message.contains("outside the allowed roots"));

        let errors = compiler()
            .compile("steps.T", "use api.ghost;\nout x = 1;\n", &[], &["x".to_string()])
            .unwrap_err();
        assert!(errors[0].message.contains("unknown service `ghost`"));

        let errors = compiler()
            .compile("steps.T", "use std.process;\nout x = 1;\n", &[], &["x".to_string()])
            .unwrap_err();
        assert!(errors[0].message.contains("unknown std namespace"));
    }

    /// **Scenario**: `out` outside the declared outputs is a compile error.
    #[test]
    fn undeclared_out_rejected() {
        let errors = compiler()
            .compile("steps.T", "out sneaky = 1;\n", &[], &["total".to_string()])
            .unwrap_err();
        assert!(errors[0].message.contains("declared outputs"));
    }

    /// **Scenario**: let bindings are block-scoped; a name bound inside an
    /// `if` arm is unresolved after it.
    #[test]
    fn block_scoping() {
        let src = r#"
if true {
  let inner = 1;
}
out x = inner;
"#;
        let errors = compiler()
            .compile("steps.T", src, &[], &["x".to_string()])
            .unwrap_err();
        assert!(errors[0].message.contains("unresolved name `inner`"));
    }

    /// **Scenario**: multiple problems are all reported in one pass.
    #[test]
    fn collects_multiple_diagnostics() {
        let src = "let a = ghost1;\nlet b = ghost2;\n";
        let errors = compiler()
            .compile("steps.T", src, &[], &[])
            .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    /// **Scenario**: check() reports `{success, errors}` for both outcomes.
    #[test]
    fn check_reports_outcome() {
        let ok = compiler().check(
            "steps.T",
            SNIPPET,
            &["params".to_string()],
            &["total".to_string()],
        );
        assert!(ok.success);
        assert!(ok.errors.is_empty());

        let bad = compiler().check("steps.T", "out x = nope;", &[], &["x".to_string()]);
        assert!(!bad.success);
        assert_eq!(bad.errors.len(), 1);
    }
}

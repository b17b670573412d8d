//! The step-snippet language: lexer, AST, parser, and scan helpers.
//!
//! Plans carry snippets in this small imperative language. Imports declare
//! which capability roots a snippet may touch (`use std.json;`,
//! `use api.acme;`); everything else is `let`/`out`/`if`/`for`/`fail` plus
//! ordinary expressions. Compilation and execution live in the sibling
//! `compile` and `interp` modules.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{BinOp, Expr, Program, Stmt, UnaryOp, UseDecl};
pub use token::{Span, Token, TokenKind};

use std::fmt;

/// One compiler diagnostic with a 1-based source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.line, self.column, self.message)
    }
}

/// Parses a snippet into a program or the full diagnostic list.
pub fn parse(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lexer::Lexer::new(source).tokenize();
    parser::Parser::new(tokens).parse()
}

/// Constant service call sites: `(service, operationId)` for every
/// `<service>.call("<op>", …)` where `<service>` is bound by `use api.…`.
/// Unparseable snippets scan as empty (the compile stage reports them).
pub fn scan_service_calls(source: &str) -> Vec<(String, String)> {
    let Ok(program) = parse(source) else {
        return vec![];
    };
    let services: Vec<&str> = program
        .uses
        .iter()
        .filter(|u| u.root() == "api")
        .map(|u| u.binding())
        .collect();

    let mut sites = Vec::new();
    for stmt in &program.stmts {
        scan_stmt(stmt, &services, &mut sites);
    }
    sites
}

fn scan_stmt(stmt: &Stmt, services: &[&str], sites: &mut Vec<(String, String)>) {
    match stmt {
        Stmt::Let { expr, .. }
        | Stmt::Out { expr, .. }
        | Stmt::Fail { expr, .. }
        | Stmt::Expr { expr, .. } => scan_expr(expr, services, sites),
        Stmt::If {
            cond,
            then,
            otherwise,
            ..
        } => {
            scan_expr(cond, services, sites);
            for s in then.iter().chain(otherwise) {
                scan_stmt(s, services, sites);
            }
        }
        Stmt::For { iter, body, .. } => {
            scan_expr(iter, services, sites);
            for s in body {
                scan_stmt(s, services, sites);
            }
        }
    }
}

fn scan_expr(expr: &Expr, services: &[&str], sites: &mut Vec<(String, String)>) {
    match expr {
        Expr::Call { callee, args, .. } => {
            if let Expr::Field { object, name, .. } = callee.as_ref() {
                if name == "call" {
                    if let Expr::Ident(service, _) = object.as_ref() {
                        if services.contains(&service.as_str()) {
                            if let Some(Expr::Str(op, _)) = args.first() {
                                sites.push((service.clone(), op.clone()));
                            }
                        }
                    }
                }
            }
            scan_expr(callee, services, sites);
            for arg in args {
                scan_expr(arg, services, sites);
            }
        }
        Expr::Field { object, .. } => scan_expr(object, services, sites),
        Expr::Index { object, index, .. } => {
            scan_expr(object, services, sites);
            scan_expr(index, services, sites);
        }
        Expr::Unary { expr, .. } => scan_expr(expr, services, sites),
        Expr::Binary { left, right, .. } => {
            scan_expr(left, services, sites);
            scan_expr(right, services, sites);
        }
        Expr::Object { fields, .. } => {
            for (_, value) in fields {
                scan_expr(value, services, sites);
            }
        }
        Expr::Array { items, .. } => {
            for item in items {
                scan_expr(item, services, sites);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: constant call sites are found, including nested ones;
    /// calls on unimported names are ignored.
    #[test]
    fn scans_call_sites() {
        let src = r#"
use api.acme;
use std.json;
let a = acme.call("query", {});
if a.ok {
  let b = acme.call("listSales", {});
  let c = other.call("nope", {});
}
"#;
        let sites = scan_service_calls(src);
        assert_eq!(
            sites,
            vec![
                ("acme".to_string(), "query".to_string()),
                ("acme".to_string(), "listSales".to_string()),
            ]
        );
    }

    /// **Scenario**: broken snippets scan as empty instead of erroring.
    #[test]
    fn broken_snippet_scans_empty() {
        assert!(scan_service_calls("let = ;").is_empty());
    }
}

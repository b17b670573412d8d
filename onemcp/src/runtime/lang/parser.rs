//! Recursive-descent parser for the step-snippet language.
//!
//! Produces either a [`Program`] or the full list of syntax diagnostics; the
//! parser recovers at statement boundaries so one bad line does not hide the
//! rest.

use super::ast::{BinOp, Expr, Program, Stmt, UnaryOp, UseDecl};
use super::token::{Span, Token, TokenKind};
use super::Diagnostic;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Result<Program, Vec<Diagnostic>> {
        let mut uses = Vec::new();
        let mut stmts = Vec::new();

        while !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::Use) {
                if !stmts.is_empty() {
                    let span = self.peek().span;
                    self.error(span, "imports must precede statements".to_string());
                    self.recover();
                    continue;
                }
                match self.parse_use() {
                    Ok(decl) => uses.push(decl),
                    Err(()) => self.recover(),
                }
            } else {
                match self.parse_stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(()) => self.recover(),
                }
            }
        }

        if self.diagnostics.is_empty() {
            Ok(Program { uses, stmts })
        } else {
            Err(self.diagnostics)
        }
    }

    // --- token plumbing -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ()> {
        if self.at(&kind) {
            return Ok(self.bump());
        }
        let found = self.peek().clone();
        self.error(
            found.span,
            format!("expected {what}, found {}", found.kind.describe()),
        );
        Err(())
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), ()> {
        let token = self.peek().clone();
        if let TokenKind::Ident(name) = token.kind {
            self.bump();
            return Ok((name, token.span));
        }
        self.error(
            token.span,
            format!("expected {what}, found {}", token.kind.describe()),
        );
        Err(())
    }

    fn error(&mut self, span: Span, message: String) {
        self.diagnostics.push(Diagnostic {
            line: span.line,
            column: span.column,
            message,
        });
    }

    /// Skips to just past the next `;` (or to a `}`/EOF) after an error.
    fn recover(&mut self) {
        loop {
            match &self.peek().kind {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semi => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    // --- declarations and statements ------------------------------------

    fn parse_use(&mut self) -> Result<UseDecl, ()> {
        let span = self.peek().span;
        self.expect(TokenKind::Use, "`use`")?;
        let mut path = vec![self.expect_ident("import root")?.0];
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_ident("import segment")?.0);
        }
        self.expect(TokenKind::Semi, "`;` after import")?;
        Ok(UseDecl { path, span })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ()> {
        let span = self.peek().span;
        match &self.peek().kind {
            TokenKind::Let => {
                self.bump();
                let (name, _) = self.expect_ident("variable name")?;
                self.expect(TokenKind::Assign, "`=`")?;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;` after let")?;
                Ok(Stmt::Let { name, expr, span })
            }
            TokenKind::Out => {
                self.bump();
                let (name, _) = self.expect_ident("output name")?;
                self.expect(TokenKind::Assign, "`=`")?;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;` after out")?;
                Ok(Stmt::Out { name, expr, span })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => {
                self.bump();
                let (var, _) = self.expect_ident("loop variable")?;
                self.expect(TokenKind::In, "`in`")?;
                let iter = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::For {
                    var,
                    iter,
                    body,
                    span,
                })
            }
            TokenKind::Fail => {
                self.bump();
                self.expect(TokenKind::LParen, "`(` after fail")?;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                self.expect(TokenKind::Semi, "`;` after fail")?;
                Ok(Stmt::Fail { expr, span })
            }
            TokenKind::Use => {
                self.error(span, "imports must precede statements".to_string());
                Err(())
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi, "`;` after expression")?;
                Ok(Stmt::Expr { expr, span })
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ()> {
        let span = self.peek().span;
        self.expect(TokenKind::If, "`if`")?;
        let cond = self.parse_expr()?;
        let then = self.parse_block()?;
        let otherwise = if self.eat(&TokenKind::Else) {
            if self.at(&TokenKind::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            vec![]
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ()> {
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(()) => self.recover(),
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(stmts)
    }

    // --- expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, ()> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_and()?;
        while self.at(&TokenKind::OrOr) {
            let span = self.bump().span;
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_equality()?;
        while self.at(&TokenKind::AndAnd) {
            let span = self.bump().span;
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                _ => return Ok(left),
            };
            let span = self.bump().span;
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(left),
            };
            let span = self.bump().span;
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            let span = self.bump().span;
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, ()> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => return Ok(left),
            };
            let span = self.bump().span;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        let span = self.peek().span;
        if self.eat(&TokenKind::Not) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
                span,
            });
        }
        if self.eat(&TokenKind::Minus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ()> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.peek().span;
            if self.eat(&TokenKind::Dot) {
                let (name, _) = self.expect_ident("field name")?;
                expr = Expr::Field {
                    object: Box::new(expr),
                    name,
                    span,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "`]`")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else if self.at(&TokenKind::LParen) {
                self.bump();
                let mut args = Vec::new();
                if !self.at(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen, "`)` after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ()> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Null => {
                self.bump();
                Ok(Expr::Null(token.span))
            }
            TokenKind::True => {
                self.bump();
                Ok(Expr::Bool(true, token.span))
            }
            TokenKind::False => {
                self.bump();
                Ok(Expr::Bool(false, token.span))
            }
            TokenKind::Number(n) => {
                self.bump();
                Ok(Expr::Number(n, token.span))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::Str(s, token.span))
            }
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Expr::Ident(name, token.span))
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::LBrace => self.parse_object(token.span),
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "`]`")?;
                Ok(Expr::Array {
                    items,
                    span: token.span,
                })
            }
            other => {
                self.error(
                    token.span,
                    format!("expected expression, found {}", other.describe()),
                );
                Err(())
            }
        }
    }

    fn parse_object(&mut self, span: Span) -> Result<Expr, ()> {
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut fields = Vec::new();
        if !self.at(&TokenKind::RBrace) {
            loop {
                let key_token = self.peek().clone();
                let key = match key_token.kind {
                    TokenKind::Str(s) => {
                        self.bump();
                        s
                    }
                    TokenKind::Ident(name) => {
                        self.bump();
                        name
                    }
                    other => {
                        self.error(
                            key_token.span,
                            format!("expected object key, found {}", other.describe()),
                        );
                        return Err(());
                    }
                };
                self.expect(TokenKind::Colon, "`:` after object key")?;
                let value = self.parse_expr()?;
                fields.push((key, value));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(Expr::Object { fields, span })
    }
}

#[cfg(test)]
mod tests {
    use super::super::{parse, Diagnostic};
    use super::*;

    /// **Scenario**: a full snippet parses with imports separated from
    /// statements.
    #[test]
    fn parses_full_snippet() {
        let src = r#"
use api.acme;
use std.json;
let req = { "filter": { "year": 2024 }, "aggregate": "sum:amount" };
let res = acme.call("query", { "body": req });
if !res.ok {
  fail("query failed with status " + res.status);
}
out total_sales = json.get(res.body, "total");
"#;
        let program = parse(src).unwrap();
        assert_eq!(program.uses.len(), 2);
        assert_eq!(program.uses[0].path, vec!["api", "acme"]);
        assert_eq!(program.stmts.len(), 4);
        assert!(matches!(program.stmts.last(), Some(Stmt::Out { name, .. }) if name == "total_sales"));
    }

    /// **Scenario**: precedence - comparison binds tighter than `&&`, which
    /// binds tighter than `||`.
    #[test]
    fn operator_precedence() {
        let program = parse("let x = 1 + 2 * 3 < 10 && true || false;").unwrap();
        let Stmt::Let { expr, .. } = &program.stmts[0] else {
            panic!("expected let");
        };
        let Expr::Binary { op: BinOp::Or, left, .. } = expr else {
            panic!("top must be ||, got {expr:?}");
        };
        assert!(matches!(**left, Expr::Binary { op: BinOp::And, .. }));
    }

    /// **Scenario**: syntax errors carry line/column and the parser recovers
    /// to report several problems from one snippet.
    #[test]
    fn diagnostics_with_positions_and_recovery() {
        let errs: Vec<Diagnostic> = parse("let = 1;\nlet y = 2;\nout = y;").unwrap_err();
        assert_eq!(errs.len(), 2, "{errs:?}");
        assert_eq!(errs[0].line, 1);
        assert_eq!(errs[1].line, 3);
        assert!(errs[0].message.contains("variable name"));
    }

    /// **Scenario**: for/else-if/index/array shapes all parse.
    #[test]
    fn control_flow_shapes() {
        let src = r#"
let xs = [1, 2, 3];
let total = 0;
for x in xs {
  if x > 2 {
    let total = total + x;
  } else if x == 2 {
    log.info("two");
  } else {
    log.info(xs[0]);
  }
}
"#;
        assert!(parse(src).is_ok());
    }

    /// **Scenario**: imports after a statement are rejected.
    #[test]
    fn late_import_rejected() {
        let errs = parse("let x = 1;\nuse std.json;").unwrap_err();
        assert!(errs[0].message.contains("imports") || errs[0].message.contains("expression"));
    }
}

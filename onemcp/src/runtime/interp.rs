//! Tree-walking evaluator for compiled snippets.
//!
//! Runs inside the sandbox with an explicit capability set: the HTTP bridge
//! for `api.<service>.call`, the step store view for inputs and `out`
//! writes, and the builtin `std` namespaces. Cooperative: every statement
//! polls the cancellation token, the wall-clock deadline, and a statement
//! budget, so runaway loops and abandoned requests stop at the next tick.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::store::{StepStoreView, StoreError};

use super::bridge::{BridgeError, HttpBridge};
use super::compile::CompiledSnippet;
use super::lang::{BinOp, Expr, Span, Stmt, UnaryOp};

/// One captured snippet log line.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct LogRecord {
    pub level: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Explicit `fail(...)` from the snippet.
    #[error("snippet failed: {0}")]
    Failed(String),

    #[error("runtime error at {line}:{column}: {message}")]
    Eval {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("statement budget exhausted")]
    Budget,

    #[error("execution deadline exceeded")]
    Timeout,

    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bridge(BridgeError),
}

impl RuntimeError {
    fn eval(span: Span, message: impl Into<String>) -> Self {
        RuntimeError::Eval {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn from_bridge(err: BridgeError) -> Self {
        match err {
            BridgeError::Cancelled => RuntimeError::Cancelled,
            BridgeError::Timeout(_) => RuntimeError::Timeout,
            other => RuntimeError::Bridge(other),
        }
    }
}

pub struct Interpreter<'a> {
    bridge: &'a HttpBridge,
    view: &'a mut StepStoreView,
    cancel: &'a CancellationToken,
    deadline: Instant,
    snippet: &'a CompiledSnippet,
    scopes: Vec<BTreeMap<String, Value>>,
    logs: Vec<LogRecord>,
    remaining_steps: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        snippet: &'a CompiledSnippet,
        bridge: &'a HttpBridge,
        view: &'a mut StepStoreView,
        cancel: &'a CancellationToken,
        deadline: Instant,
        max_steps: u64,
    ) -> Self {
        let globals: BTreeMap<String, Value> = view
            .inputs()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            bridge,
            view,
            cancel,
            deadline,
            snippet,
            scopes: vec![globals],
            logs: Vec::new(),
            remaining_steps: max_steps,
        }
    }

    pub async fn run(mut self) -> Result<Vec<LogRecord>, RuntimeError> {
        let stmts = &self.snippet.program.stmts;
        self.exec_block_ref(stmts).await?;
        Ok(self.logs)
    }

    /// Cooperative check, once per statement.
    fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(RuntimeError::Timeout);
        }
        if self.remaining_steps == 0 {
            return Err(RuntimeError::Budget);
        }
        self.remaining_steps -= 1;
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn exec_block_ref<'b>(
        &'b mut self,
        stmts: &'b [Stmt],
    ) -> BoxFuture<'b, Result<(), RuntimeError>> {
        Box::pin(async move {
            for stmt in stmts {
                self.exec_stmt(stmt).await?;
            }
            Ok(())
        })
    }

    fn exec_stmt<'b>(&'b mut self, stmt: &'b Stmt) -> BoxFuture<'b, Result<(), RuntimeError>> {
        Box::pin(async move {
            self.tick()?;
            match stmt {
                Stmt::Let { name, expr, .. } => {
                    let value = self.eval(expr).await?;
                    self.bind(name, value);
                    Ok(())
                }
                Stmt::Out { name, expr, .. } => {
                    let value = self.eval(expr).await?;
                    self.view.write(name, value)?;
                    Ok(())
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                    span,
                } => {
                    let value = self.eval(cond).await?;
                    let Value::Bool(flag) = value else {
                        return Err(RuntimeError::eval(*span, "if condition must be boolean"));
                    };
                    self.scopes.push(BTreeMap::new());
                    let result = if flag {
                        self.exec_block_ref(then).await
                    } else {
                        self.exec_block_ref(otherwise).await
                    };
                    self.scopes.pop();
                    result
                }
                Stmt::For {
                    var,
                    iter,
                    body,
                    span,
                } => {
                    let value = self.eval(iter).await?;
                    let Value::Array(items) = value else {
                        return Err(RuntimeError::eval(*span, "for expects an array"));
                    };
                    for item in items {
                        self.scopes.push(BTreeMap::new());
                        self.bind(var, item);
                        let result = self.exec_block_ref(body).await;
                        self.scopes.pop();
                        result?;
                    }
                    Ok(())
                }
                Stmt::Fail { expr, .. } => {
                    let value = self.eval(expr).await?;
                    Err(RuntimeError::Failed(stringify(&value)))
                }
                Stmt::Expr { expr, .. } => {
                    self.eval(expr).await?;
                    Ok(())
                }
            }
        })
    }

    fn eval<'b>(&'b mut self, expr: &'b Expr) -> BoxFuture<'b, Result<Value, RuntimeError>> {
        Box::pin(async move {
            match expr {
                Expr::Null(_) => Ok(Value::Null),
                Expr::Bool(b, _) => Ok(Value::Bool(*b)),
                Expr::Number(n, _) => Ok(json!(*n)),
                Expr::Str(s, _) => Ok(Value::String(s.clone())),
                Expr::Ident(name, span) => match self.lookup(name) {
                    Some(value) => Ok(value.clone()),
                    None => {
                        if self.snippet.std_namespaces.contains(name)
                            || self.snippet.services.contains(name)
                        {
                            Err(RuntimeError::eval(
                                *span,
                                format!("namespace `{name}` cannot be used as a value"),
                            ))
                        } else {
                            Err(RuntimeError::eval(*span, format!("unbound name `{name}`")))
                        }
                    }
                },
                Expr::Field { object, name, span } => {
                    let value = self.eval(object).await?;
                    match value {
                        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                        other => Err(RuntimeError::eval(
                            *span,
                            format!("field access `.{name}` on non-object ({})", kind(&other)),
                        )),
                    }
                }
                Expr::Index {
                    object,
                    index,
                    span,
                } => {
                    let container = self.eval(object).await?;
                    let key = self.eval(index).await?;
                    match (&container, &key) {
                        (Value::Array(items), Value::Number(n)) => {
                            let i = n.as_f64().unwrap_or(-1.0);
                            if i < 0.0 {
                                return Ok(Value::Null);
                            }
                            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
                        }
                        (Value::Object(map), Value::String(k)) => {
                            Ok(map.get(k).cloned().unwrap_or(Value::Null))
                        }
                        _ => Err(RuntimeError::eval(
                            *span,
                            format!(
                                "cannot index {} with {}",
                                kind(&container),
                                kind(&key)
                            ),
                        )),
                    }
                }
                Expr::Call { callee, args, span } => self.eval_call(callee, args, *span).await,
                Expr::Unary { op, expr, span } => {
                    let value = self.eval(expr).await?;
                    match (op, value) {
                        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                        (UnaryOp::Neg, Value::Number(n)) => {
                            Ok(json!(-n.as_f64().unwrap_or(0.0)))
                        }
                        (op, value) => Err(RuntimeError::eval(
                            *span,
                            format!("bad operand for {op:?}: {}", kind(&value)),
                        )),
                    }
                }
                Expr::Binary {
                    op,
                    left,
                    right,
                    span,
                } => self.eval_binary(*op, left, right, *span).await,
                Expr::Object { fields, .. } => {
                    let mut map = serde_json::Map::new();
                    for (key, value_expr) in fields {
                        let value = self.eval(value_expr).await?;
                        map.insert(key.clone(), value);
                    }
                    Ok(Value::Object(map))
                }
                Expr::Array { items, .. } => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
            }
        })
    }

    async fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        // Short-circuit logic first.
        if matches!(op, BinOp::And | BinOp::Or) {
            let lhs = self.eval(left).await?;
            let Value::Bool(l) = lhs else {
                return Err(RuntimeError::eval(span, "logical operand must be boolean"));
            };
            if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
                return Ok(Value::Bool(l));
            }
            let rhs = self.eval(right).await?;
            let Value::Bool(r) = rhs else {
                return Err(RuntimeError::eval(span, "logical operand must be boolean"));
            };
            return Ok(Value::Bool(r));
        }

        let lhs = self.eval(left).await?;
        let rhs = self.eval(right).await?;
        match op {
            BinOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinOp::Ne => Ok(Value::Bool(lhs != rhs)),
            BinOp::Add => match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => {
                    Ok(json!(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)))
                }
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::String(format!("{}{}", stringify(&lhs), stringify(&rhs))))
                }
                _ => Err(RuntimeError::eval(
                    span,
                    format!("cannot add {} and {}", kind(&lhs), kind(&rhs)),
                )),
            },
            BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
                    return Err(RuntimeError::eval(
                        span,
                        format!("arithmetic needs numbers, got {} and {}", kind(&lhs), kind(&rhs)),
                    ));
                };
                let a = a.as_f64().unwrap_or(0.0);
                let b = b.as_f64().unwrap_or(0.0);
                let result = match op {
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => {
                        if b == 0.0 {
                            return Err(RuntimeError::eval(span, "division by zero"));
                        }
                        a / b
                    }
                    _ => unreachable!(),
                };
                Ok(json!(result))
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (&lhs, &rhs) {
                    (Value::Number(a), Value::Number(b)) => a
                        .as_f64()
                        .unwrap_or(0.0)
                        .partial_cmp(&b.as_f64().unwrap_or(0.0)),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                let Some(ordering) = ordering else {
                    return Err(RuntimeError::eval(
                        span,
                        format!("cannot compare {} and {}", kind(&lhs), kind(&rhs)),
                    ));
                };
                let result = match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    async fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<Value, RuntimeError> {
        // Namespace or service method: `<ns>.<func>(...)`.
        if let Expr::Field { object, name, .. } = callee {
            if let Expr::Ident(root, _) = object.as_ref() {
                if self.lookup(root).is_none() {
                    if self.snippet.services.contains(root) {
                        return self.eval_service_call(root.clone(), name, args, span).await;
                    }
                    if self.snippet.std_namespaces.contains(root) {
                        let mut values = Vec::with_capacity(args.len());
                        for arg in args {
                            values.push(self.eval(arg).await?);
                        }
                        return self.eval_builtin(root, name, values, span);
                    }
                }
            }
        }
        Err(RuntimeError::eval(
            span,
            "only namespace and service functions are callable".to_string(),
        ))
    }

    async fn eval_service_call(
        &mut self,
        service: String,
        method: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<Value, RuntimeError> {
        if method != "call" {
            return Err(RuntimeError::eval(
                span,
                format!("service `{service}` has no method `{method}` (use `.call`)"),
            ));
        }
        let Some(first) = args.first() else {
            return Err(RuntimeError::eval(span, "service call needs an operation id"));
        };
        let operation = match self.eval(first).await? {
            Value::String(op) => op,
            other => {
                return Err(RuntimeError::eval(
                    span,
                    format!("operation id must be a string, got {}", kind(&other)),
                ))
            }
        };
        let call_args = match args.get(1) {
            Some(expr) => self.eval(expr).await?,
            None => json!({}),
        };

        let response = self
            .bridge
            .call(&service, &operation, &call_args, self.cancel)
            .await
            .map_err(RuntimeError::from_bridge)?;
        Ok(response.to_value())
    }

    fn eval_builtin(
        &mut self,
        namespace: &str,
        func: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let err = |message: String| Err(RuntimeError::eval(span, message));
        match (namespace, func) {
            ("json", "object") => Ok(json!({})),
            ("json", "array") => Ok(json!([])),
            ("json", "get") => {
                let [value, path] = two(args, span, "json.get(value, path)")?;
                let Value::String(path) = path else {
                    return err("json.get path must be a string".to_string());
                };
                Ok(json_get(&value, &path))
            }
            ("json", "set") => {
                let [target, key, value] = three(args, span, "json.set(object, path, value)")?;
                let Value::String(key) = key else {
                    return err("json.set path must be a string".to_string());
                };
                json_set(target, &key, value).map_err(|m| RuntimeError::eval(span, m))
            }
            ("json", "parse") => {
                let [text] = one(args, span, "json.parse(text)")?;
                let Value::String(text) = text else {
                    return err("json.parse expects a string".to_string());
                };
                Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
            }
            ("json", "stringify") => {
                let [value] = one(args, span, "json.stringify(value)")?;
                Ok(Value::String(
                    serde_json::to_string(&value).unwrap_or_default(),
                ))
            }
            ("list", "len") => {
                let [value] = one(args, span, "list.len(value)")?;
                match value {
                    Value::Array(items) => Ok(json!(items.len())),
                    Value::String(s) => Ok(json!(s.chars().count())),
                    Value::Object(map) => Ok(json!(map.len())),
                    other => err(format!("list.len on {}", kind(&other))),
                }
            }
            ("list", "push") => {
                let [list, value] = two(args, span, "list.push(list, value)")?;
                let Value::Array(mut items) = list else {
                    return err("list.push expects an array".to_string());
                };
                items.push(value);
                Ok(Value::Array(items))
            }
            ("list", "get") => {
                let [list, index] = two(args, span, "list.get(list, index)")?;
                let (Value::Array(items), Value::Number(n)) = (&list, &index) else {
                    return err("list.get expects (array, number)".to_string());
                };
                let i = n.as_f64().unwrap_or(-1.0);
                if i < 0.0 {
                    return Ok(Value::Null);
                }
                Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
            }
            ("text", "concat") => {
                let mut out = String::new();
                for arg in &args {
                    out.push_str(&stringify(arg));
                }
                Ok(Value::String(out))
            }
            ("text", "contains") => {
                let [haystack, needle] = two(args, span, "text.contains(text, sub)")?;
                let (Value::String(h), Value::String(n)) = (&haystack, &needle) else {
                    return err("text.contains expects strings".to_string());
                };
                Ok(Value::Bool(h.contains(n.as_str())))
            }
            ("math", "sum") | ("math", "avg") | ("math", "min") | ("math", "max") => {
                let [value] = one(args, span, "math fn expects one array")?;
                let Value::Array(items) = value else {
                    return err(format!("math.{func} expects an array"));
                };
                let mut numbers = Vec::with_capacity(items.len());
                for item in &items {
                    let Some(n) = item.as_f64() else {
                        return err(format!("math.{func} expects numbers, got {}", kind(item)));
                    };
                    numbers.push(n);
                }
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                let sum: f64 = numbers.iter().sum();
                let result = match func {
                    "sum" => sum,
                    "avg" => sum / numbers.len() as f64,
                    "min" => numbers.iter().cloned().fold(f64::INFINITY, f64::min),
                    "max" => numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    _ => unreachable!(),
                };
                Ok(json!(result))
            }
            ("log", level @ ("debug" | "info" | "warn" | "error")) => {
                self.logs.push(LogRecord {
                    level: level.to_string(),
                    args,
                });
                Ok(Value::Null)
            }
            (ns, func) => err(format!("unknown builtin `{ns}.{func}`")),
        }
    }
}

fn one(args: Vec<Value>, span: Span, usage: &str) -> Result<[Value; 1], RuntimeError> {
    <[Value; 1]>::try_from(args)
        .map_err(|_| RuntimeError::eval(span, format!("wrong arity, expected {usage}")))
}

fn two(args: Vec<Value>, span: Span, usage: &str) -> Result<[Value; 2], RuntimeError> {
    <[Value; 2]>::try_from(args)
        .map_err(|_| RuntimeError::eval(span, format!("wrong arity, expected {usage}")))
}

fn three(args: Vec<Value>, span: Span, usage: &str) -> Result<[Value; 3], RuntimeError> {
    <[Value; 3]>::try_from(args)
        .map_err(|_| RuntimeError::eval(span, format!("wrong arity, expected {usage}")))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Human-ish string form: strings stay bare, everything else JSON-encodes.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dotted-path read; array segments index numerically. Missing → null.
fn json_get(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

/// Dotted-path write, creating intermediate objects. Returns the new value.
fn json_set(target: Value, path: &str, value: Value) -> Result<Value, String> {
    let mut root = match target {
        Value::Object(map) => Value::Object(map),
        Value::Null => json!({}),
        other => return Err(format!("json.set target must be an object, got {}", kind(&other))),
    };
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = &mut root;
    for (i, segment) in segments.iter().enumerate() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| format!("json.set path `{path}` crosses a non-object"))?;
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return Ok(root);
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| json!({}));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: dotted reads traverse objects and arrays; misses are null.
    #[test]
    fn json_get_traversal() {
        let value = json!({"a": {"b": [10, {"c": 42}]}});
        assert_eq!(json_get(&value, "a.b.1.c"), json!(42));
        assert_eq!(json_get(&value, "a.b.0"), json!(10));
        assert_eq!(json_get(&value, "a.x.y"), Value::Null);
    }

    /// **Scenario**: dotted writes create intermediate objects.
    #[test]
    fn json_set_creates_path() {
        let out = json_set(json!({}), "filter.date.year", json!(2024)).unwrap();
        assert_eq!(out["filter"]["date"]["year"], 2024);
    }
}

//! Sandbox: the cooperative isolate around snippet execution.
//!
//! Compiled snippets run with exactly three capabilities - the HTTP bridge,
//! the step store view, and the builtin namespaces - under a wall-clock
//! timeout (default 60s) and a statement budget. There is no filesystem,
//! process, or host access to withhold: the interpreter simply has no such
//! operations. Structured snippet logs come back alongside the outputs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::StepStoreView;

use super::bridge::HttpBridge;
use super::compile::CompiledSnippet;
use super::interp::{Interpreter, LogRecord, RuntimeError};

#[derive(Clone, Copy, Debug)]
pub struct SandboxConfig {
    /// Wall-clock limit for one snippet execution.
    pub timeout: Duration,
    /// Statement budget; stops runaway loops between suspension points.
    pub max_steps: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_steps: 100_000,
        }
    }
}

/// Successful execution: the step's written outputs plus captured logs.
#[derive(Clone, Debug)]
pub struct SandboxOutcome {
    pub outputs: BTreeMap<String, Value>,
    pub logs: Vec<LogRecord>,
}

pub struct Sandbox {
    bridge: Arc<HttpBridge>,
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(bridge: Arc<HttpBridge>, config: SandboxConfig) -> Self {
        Self { bridge, config }
    }

    /// Executes one compiled snippet against a step view.
    ///
    /// On success the view's writes are returned for the orchestrator to
    /// commit; on any error the view is dropped here and nothing escapes.
    pub async fn execute(
        &self,
        snippet: &CompiledSnippet,
        mut view: StepStoreView,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, RuntimeError> {
        let deadline = Instant::now() + self.config.timeout;
        debug!(
            qualified_name = %snippet.qualified_name,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "sandbox execute"
        );

        let interpreter = Interpreter::new(
            snippet,
            &self.bridge,
            &mut view,
            cancel,
            deadline,
            self.config.max_steps,
        );

        // The interpreter polls cooperatively; the outer timeout covers any
        // awaits that outlive the deadline.
        let logs = match tokio::time::timeout(self.config.timeout, interpreter.run()).await {
            Ok(result) => result?,
            Err(_) => return Err(RuntimeError::Timeout),
        };

        Ok(SandboxOutcome {
            outputs: view.into_written(),
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handbook::{fixtures, Handbook};
    use crate::runtime::compile::Compiler;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_acme_server() -> String {
        let app = Router::new().route(
            "/query",
            post(|Json(_): Json<Value>| async move { Json(json!({"total": 123450.5})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn compiled(snippet: &str, inputs: &[&str], outputs: &[&str]) -> CompiledSnippet {
        Compiler::new(["acme".to_string()])
            .compile(
                "steps.Test",
                snippet,
                &inputs.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                &outputs.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )
            .unwrap()
    }

    async fn sandbox_for(base_url: &str) -> Sandbox {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_acme_handbook_with_base_url(dir.path(), base_url);
        let handbook = Handbook::load(dir.path()).unwrap();
        Sandbox::new(
            Arc::new(HttpBridge::from_handbook(&handbook)),
            SandboxConfig::default(),
        )
    }

    fn view(inputs: &[(&str, Value)], outputs: &[&str]) -> StepStoreView {
        StepStoreView::new(
            inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// **Scenario**: a snippet calls the Acme query operation, extracts the
    /// total, and writes its declared output; logs are captured structurally.
    #[tokio::test]
    async fn executes_query_snippet() {
        let base = spawn_acme_server().await;
        let sandbox = sandbox_for(&base).await;
        let snippet = compiled(
            r#"
use api.acme;
use std.json;
use std.log;
log.info("querying", params);
let res = acme.call("query", { "body": params });
if !res.ok {
  fail("query failed");
}
out total_sales = json.get(res.body, "total");
"#,
            &["params"],
            &["total_sales"],
        );

        let outcome = sandbox
            .execute(
                &snippet,
                view(&[("params", json!({"year": 2024}))], &["total_sales"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.outputs["total_sales"], json!(123450.5));
        assert_eq!(outcome.logs.len(), 1);
        assert_eq!(outcome.logs[0].level, "info");
        assert_eq!(outcome.logs[0].args[0], json!("querying"));
    }

    /// **Scenario**: `fail(...)` surfaces as a Failed error with the message.
    #[tokio::test]
    async fn explicit_fail_surfaces() {
        let base = spawn_acme_server().await;
        let sandbox = sandbox_for(&base).await;
        let snippet = compiled(r#"fail("not today");"#, &[], &[]);
        let err = sandbox
            .execute(&snippet, view(&[], &[]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Failed(m) if m == "not today"));
    }

    /// **Scenario**: an infinite loop trips the statement budget instead of
    /// hanging (the loop body is pure, so the budget is the only brake).
    #[tokio::test]
    async fn statement_budget_stops_runaway() {
        let base = spawn_acme_server().await;
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_acme_handbook_with_base_url(dir.path(), &base);
        let handbook = Handbook::load(dir.path()).unwrap();
        let sandbox = Sandbox::new(
            Arc::new(HttpBridge::from_handbook(&handbook)),
            SandboxConfig {
                timeout: Duration::from_secs(30),
                max_steps: 500,
            },
        );

        let mut items = String::from("[");
        for i in 0..1000 {
            if i > 0 {
                items.push(',');
            }
            items.push_str(&i.to_string());
        }
        items.push(']');
        let snippet = compiled(
            &format!("let xs = {items};\nlet n = 0;\nfor x in xs {{\n  let n = n + x;\n}}\n"),
            &[],
            &[],
        );
        let err = sandbox
            .execute(&snippet, view(&[], &[]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Budget));
    }

    /// **Scenario**: cancellation mid-execution aborts and no outputs leak -
    /// the dropped view discards whatever was written.
    #[tokio::test]
    async fn cancellation_discards_writes() {
        let base = spawn_acme_server().await;
        let sandbox = sandbox_for(&base).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let snippet = compiled("out x = 1;", &[], &["x"]);
        let err = sandbox
            .execute(&snippet, view(&[], &["x"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled));
    }

    /// **Scenario**: a type error carries the snippet position.
    #[tokio::test]
    async fn type_errors_carry_position() {
        let base = spawn_acme_server().await;
        let sandbox = sandbox_for(&base).await;
        let snippet = compiled("let x = 1 + true;", &[], &[]);
        let err = sandbox
            .execute(&snippet, view(&[], &[]), &CancellationToken::new())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("1:"), "missing position: {msg}");
        assert!(msg.contains("cannot add"), "missing message: {msg}");
    }
}

//! Shared harness: Acme handbook fixture, black-box Acme server, and an MCP
//! server bound to 127.0.0.1:0 with a scripted mock LLM.

use std::path::Path;
use std::sync::Arc;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use onemcp::{
    ChatCompletion, Engine, EngineConfig, Handbook, MemoryGraphStore, MockLlm, PlanCache,
};
use serve::AppState;

const ACME_OPENAPI: &str = r#"
openapi: 3.0.3
info:
  title: Acme Data API
tags:
  - name: Sales
paths:
  /query:
    post:
      operationId: query
      summary: Query and aggregate sales records
      tags: [Sales]
      requestBody:
        content:
          application/json:
            schema:
              type: object
              properties:
                filter: { type: object }
                aggregate: { type: string }
      responses:
        '200':
          description: aggregate result
          content:
            application/json:
              schema:
                type: object
                properties:
                  total: { type: number }
"#;

pub fn write_handbook(root: &Path, base_url: &str) {
    std::fs::create_dir_all(root.join("apis")).unwrap();
    std::fs::create_dir_all(root.join("docs")).unwrap();
    let agent = format!(
        r#"
name: acme-agent
provider: mock
model: test-model
apis:
  - slug: acme
    name: Acme Data
    ref: apis/acme.yaml
    auth:
      base_url: {base_url}
    entities:
      - name: sale
        tag: Sales
"#
    );
    std::fs::write(root.join("agent.yaml"), agent).unwrap();
    std::fs::write(root.join("apis/acme.yaml"), ACME_OPENAPI).unwrap();
    std::fs::write(root.join("docs/sales.md"), "# Sales\n\nQuery aggregates sales.\n").unwrap();
}

pub async fn spawn_acme() -> String {
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

pub fn normalize_reply() -> String {
    json!({
        "action": "aggregate",
        "entities": ["sale"],
        "fields": ["amount"],
        "params": {"year": 2024}
    })
    .to_string()
}

pub fn plan_reply() -> String {
    json!({
        "workflow": "sequential",
        "steps": [{
            "id": "s1",
            "class_name": "steps.AcmeTotal",
            "snippet": "use api.acme;\nuse std.json;\nlet res = acme.call(\"query\", {});\nout total_sales = json.get(res.body, \"total\");",
            "input_vars": [],
            "output_vars": ["total_sales"],
            "services_used": ["acme"]
        }]
    })
    .to_string()
}

/// Spawns a full MCP server; returns its base URL.
pub async fn spawn_mcp_server(replies: Vec<ChatCompletion>) -> String {
    let acme_url = spawn_acme().await;
    let dir = tempfile::tempdir().unwrap();
    write_handbook(dir.path(), &acme_url);
    let handbook = Handbook::load(dir.path()).unwrap();
    let config = EngineConfig::from_agent(handbook.agent());
    let engine = Engine::new(
        handbook,
        Arc::new(MockLlm::script(replies)),
        Arc::new(MemoryGraphStore::new()),
        Arc::new(PlanCache::in_memory()),
        config,
    )
    .await
    .unwrap();

    let state = Arc::new(AppState::new(engine));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        serve::run_serve_on_listener(listener, state).await.unwrap();
    });
    format!("http://{addr}")
}

/// Data payloads of every SSE `data:` line in a response body.
pub fn parse_sse(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}

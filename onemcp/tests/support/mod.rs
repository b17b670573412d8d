//! Shared fixtures for the pipeline integration tests: the Acme handbook on
//! disk and a black-box Acme HTTP server.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const ACME_OPENAPI: &str = r#"
openapi: 3.0.3
info:
  title: Acme Data API
  description: Query and manage Acme sales records.
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
              $ref: '#/components/schemas/QueryRequest'
      responses:
        '200':
          description: aggregate result
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/QueryResponse'
  /sales:
    get:
      operationId: listSales
      summary: List sales records
      tags: [Sales]
      responses:
        '200':
          description: sales page
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/Sale'
components:
  schemas:
    QueryRequest:
      type: object
      properties:
        filter: { type: object }
        group_by: { type: array, items: { type: string } }
        aggregate: { type: string }
    QueryResponse:
      type: object
      properties:
        total: { type: number }
    Sale:
      type: object
      properties:
        id: { type: string }
        amount: { type: number }
        state: { type: string }
        year: { type: integer }
"#;

/// Writes an Acme handbook pointing at `base_url`.
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
      header_name: Authorization
      pattern: "Bearer {{token}}"
      token: acme-secret
    entities:
      - name: sale
        tag: Sales
        operation_kinds: [retrieve, compute]
"#
    );
    std::fs::write(root.join("agent.yaml"), agent).unwrap();
    std::fs::write(root.join("apis/acme.yaml"), ACME_OPENAPI).unwrap();
    std::fs::write(
        root.join("docs/sales.md"),
        "# Sales guide\n\nThe query operation aggregates sales records by filter.\n",
    )
    .unwrap();
}

/// A running Acme server plus its request counter.
pub struct AcmeServer {
    pub base_url: String,
    pub query_calls: Arc<AtomicUsize>,
}

impl AcmeServer {
    pub fn calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

/// Spawns the black-box Acme server; `query_delay_ms` slows `/query` down
/// for cancellation tests.
pub async fn spawn_acme(query_delay_ms: u64) -> AcmeServer {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_for_route = counter.clone();
    let app = Router::new()
        .route(
            "/query",
            post(move |Json(_): Json<Value>| {
                let counter = counter_for_route.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if query_delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(query_delay_ms)).await;
                    }
                    Json(json!({"total": 123450.5}))
                }
            }),
        )
        .route(
            "/sales",
            get(|| async {
                Json(json!([
                    {"id": "s1", "amount": 10.5, "state": "CA", "year": 2024},
                    {"id": "s2", "amount": 20.0, "state": "OR", "year": 2024}
                ]))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    AcmeServer {
        base_url: format!("http://{addr}"),
        query_calls: counter,
    }
}

/// Normalize reply for "total sales" prompts (optionally grouped by state).
pub fn normalize_reply(grouped: bool) -> String {
    if grouped {
        json!({
            "action": "aggregate",
            "entities": ["sale"],
            "fields": ["amount", "state"],
            "params": {},
            "group_by": ["state"],
            "filters": []
        })
        .to_string()
    } else {
        json!({
            "action": "aggregate",
            "entities": ["sale"],
            "fields": ["amount"],
            "params": {"year": 2024},
            "group_by": [],
            "filters": [{"field": "year", "op": "eq", "value": 2024}]
        })
        .to_string()
    }
}

/// A one-step plan reply calling the Acme query operation.
pub fn plan_reply() -> String {
    let snippet = "use api.acme;\nuse std.json;\nlet res = acme.call(\"query\", { \"body\": { \"filter\": params.filters, \"aggregate\": \"sum:amount\" } });\nif !res.ok {\n  fail(\"query failed\");\n}\nout total_sales = json.get(res.body, \"total\");";
    json!({
        "workflow": "sequential",
        "steps": [{
            "id": "s1",
            "class_name": "steps.AcmeTotal",
            "snippet": snippet,
            "input_vars": ["params"],
            "output_vars": ["total_sales"],
            "services_used": ["acme"]
        }]
    })
    .to_string()
}

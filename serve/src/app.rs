//! Axum app: state, router, and the `/mcp` dispatch handler.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{http::StatusCode, Json, Router};
use serde_json::Value;

use onemcp::Engine;

use crate::mcp::{self, RpcMessage, RpcRequest};
use crate::run::handle_run_call;

/// Server state: the engine snapshot (swapped atomically on handbook
/// reload, so in-flight requests keep the snapshot they started with).
pub struct AppState {
    engine: ArcSwap<Engine>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: ArcSwap::from_pointee(engine),
        }
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.load_full()
    }

    /// Replaces the engine snapshot (handbook reload).
    pub fn swap_engine(&self, engine: Engine) {
        self.engine.store(Arc::new(engine));
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .with_state(state)
}

async fn mcp_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return Json(RpcMessage::error(None, -32700, format!("parse error: {e}")))
                .into_response()
        }
    };

    tracing::debug!(method = %request.method, has_id = request.id.is_some(), "mcp request");

    match request.method.as_str() {
        "initialize" => {
            Json(RpcMessage::result(request.id, mcp::initialize_result())).into_response()
        }
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "ping" => Json(RpcMessage::result(
            request.id,
            Value::Object(Default::default()),
        ))
        .into_response(),
        "tools/list" => {
            Json(RpcMessage::result(request.id, mcp::tools_list_result())).into_response()
        }
        "tools/call" => handle_run_call(state, request).await,
        other => Json(RpcMessage::error(
            request.id,
            -32601,
            format!("method `{other}` not found"),
        ))
        .into_response(),
    }
}

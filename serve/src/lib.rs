//! MCP endpoint for OneMCP (axum, streamable HTTP).
//!
//! `POST /mcp` speaks JSON-RPC 2.0: `initialize`, `tools/list`, and
//! `tools/call` for the single tool `onemcp.run`. Tool calls answer with a
//! `text/event-stream` of progress notifications followed by one result
//! message; client disconnection cancels the request. `GET /healthz` is a
//! liveness probe.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`AppState`],
//! [`build_engine_from_env`].

mod app;
mod mcp;
mod run;

pub use app::AppState;
pub use mcp::{MCP_PROTOCOL_VERSION, RUN_TOOL};

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use onemcp::{
    Engine, EngineConfig, Handbook, MemoryGraphStore, PlanCache, ProviderConfig, ProviderRegistry,
};

const DEFAULT_ADDR: &str = "127.0.0.1:8978";

/// Builds the engine from the environment:
/// `ONEMCP_HANDBOOK` (required), `ONEMCP_PROVIDER`/`ONEMCP_MODEL`
/// (defaulting to the agent descriptor), provider credentials, and
/// `ONEMCP_PLAN_CACHE_PATH` for persistence.
pub async fn build_engine_from_env() -> Result<Engine, Box<dyn std::error::Error + Send + Sync>> {
    let root = std::env::var("ONEMCP_HANDBOOK")
        .map_err(|_| "ONEMCP_HANDBOOK must point at a handbook directory")?;
    let handbook = Handbook::load(&root)?;

    let provider = std::env::var("ONEMCP_PROVIDER")
        .unwrap_or_else(|_| handbook.agent().provider.clone());
    let model = std::env::var("ONEMCP_MODEL").unwrap_or_else(|_| handbook.agent().model.clone());
    let provider_config = ProviderConfig::new(model).with_env_keys(&[
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "ANTHROPIC_API_KEY",
        "ANTHROPIC_BASE_URL",
    ]);
    let llm = ProviderRegistry::builtin().build(&provider, &provider_config)?;

    let plan_cache = match std::env::var("ONEMCP_PLAN_CACHE_PATH") {
        Ok(path) => Arc::new(PlanCache::with_persistence(path)),
        Err(_) => Arc::new(PlanCache::in_memory()),
    };

    let mut config = EngineConfig::from_agent(handbook.agent());
    if let Some(n) = env_usize("ONEMCP_FANOUT_CONCURRENCY") {
        config.fanout_concurrency = n.max(1);
    }
    if let Some(ms) = env_usize("ONEMCP_SANDBOX_TIMEOUT_MS") {
        config.sandbox.timeout = std::time::Duration::from_millis(ms as u64);
    }

    let engine = Engine::new(
        handbook,
        llm,
        Arc::new(MemoryGraphStore::new()),
        plan_cache,
        config,
    )
    .await?;
    Ok(engine)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Serves on an existing listener. Used by tests (bind 127.0.0.1:0, pass
/// the listener in).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("MCP endpoint listening on http://{addr}/mcp");
    axum::serve(listener, app::router(state)).await?;
    Ok(())
}

/// Builds the engine from the environment and serves on `addr`
/// (default 127.0.0.1:8978).
pub async fn run_serve(
    addr: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let engine = build_engine_from_env().await?;
    let state = Arc::new(AppState::new(engine));
    let listener = TcpListener::bind(addr.unwrap_or(DEFAULT_ADDR)).await?;
    run_serve_on_listener(listener, state).await
}

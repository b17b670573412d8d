//! OneMCP server binary: load config, build the engine, serve MCP.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config::load_and_apply("onemcp", None)?;

    let addr = match (std::env::var("ONEMCP_HOST"), std::env::var("ONEMCP_PORT")) {
        (Ok(host), Ok(port)) => Some(format!("{host}:{port}")),
        (Ok(host), Err(_)) => Some(format!("{host}:8978")),
        (Err(_), Ok(port)) => Some(format!("127.0.0.1:{port}")),
        (Err(_), Err(_)) => None,
    };

    serve::run_serve(addr.as_deref()).await
}

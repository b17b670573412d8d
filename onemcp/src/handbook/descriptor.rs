//! Agent and API descriptors (`agent.yaml`).
//!
//! The agent descriptor names the LLM provider and model, per-stage timeouts,
//! and the list of API descriptors. Each API descriptor binds a service slug
//! to one OpenAPI file (`ref`, relative to the handbook root), its auth
//! configuration, and the declared entities with their OpenAPI tag bindings
//! and operation kind hints.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level `agent.yaml` shape.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AgentDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    /// Stable provider id (`openai`, `anthropic`, `mock`).
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub timeouts: StageTimeouts,
    /// Parallel-fanout worker bound; defaults to CPU count when absent.
    #[serde(default)]
    pub fanout_concurrency: Option<usize>,
    /// When true, a plan-cache miss fails with PLANNING instead of planning.
    #[serde(default)]
    pub static_mode: bool,
    #[serde(default)]
    pub apis: Vec<ApiDescriptor>,
}

/// Per-stage timeouts in milliseconds, independent of the overall deadline.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct StageTimeouts {
    #[serde(default = "default_normalize_ms")]
    pub normalize_ms: u64,
    #[serde(default = "default_plan_ms")]
    pub plan_ms: u64,
    #[serde(default = "default_compile_ms")]
    pub compile_ms: u64,
    #[serde(default = "default_execute_ms")]
    pub execute_ms: u64,
    #[serde(default = "default_summarize_ms")]
    pub summarize_ms: u64,
}

fn default_normalize_ms() -> u64 {
    20_000
}
fn default_plan_ms() -> u64 {
    45_000
}
fn default_compile_ms() -> u64 {
    30_000
}
fn default_execute_ms() -> u64 {
    60_000
}
fn default_summarize_ms() -> u64 {
    20_000
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            normalize_ms: default_normalize_ms(),
            plan_ms: default_plan_ms(),
            compile_ms: default_compile_ms(),
            execute_ms: default_execute_ms(),
            summarize_ms: default_summarize_ms(),
        }
    }
}

impl StageTimeouts {
    pub fn normalize(&self) -> Duration {
        Duration::from_millis(self.normalize_ms)
    }
    pub fn plan(&self) -> Duration {
        Duration::from_millis(self.plan_ms)
    }
    pub fn compile(&self) -> Duration {
        Duration::from_millis(self.compile_ms)
    }
    pub fn execute(&self) -> Duration {
        Duration::from_millis(self.execute_ms)
    }
    pub fn summarize(&self) -> Duration {
        Duration::from_millis(self.summarize_ms)
    }
}

/// One API: slug, display name, OpenAPI file reference, auth, entities.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApiDescriptor {
    pub slug: String,
    pub name: String,
    /// Path to the OpenAPI file, relative to the handbook root (under `apis/`).
    #[serde(rename = "ref")]
    pub spec_ref: String,
    pub auth: ServiceAuth,
    #[serde(default)]
    pub entities: Vec<EntityBinding>,
}

/// Per-service authentication: header pattern with `{token}` substituted at
/// request time. The token never appears in logs.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceAuth {
    pub base_url: String,
    #[serde(default)]
    pub header_name: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl ServiceAuth {
    /// Renders the auth header value, substituting `{token}`.
    /// Returns None when no header is configured.
    pub fn header(&self) -> Option<(String, String)> {
        let name = self.header_name.as_ref()?;
        let pattern = self.pattern.as_deref().unwrap_or("{token}");
        let token = self.token.as_deref().unwrap_or("");
        Some((name.clone(), pattern.replace("{token}", token)))
    }
}

/// Entity declared on a service: maps a vocabulary entity onto an OpenAPI tag
/// and hints which operation kinds matter for it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EntityBinding {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub operation_kinds: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_YAML: &str = r#"
name: acme-agent
provider: mock
model: test-model
timeouts:
  execute_ms: 120000
apis:
  - slug: acme
    name: Acme Data
    ref: apis/acme.yaml
    auth:
      base_url: http://127.0.0.1:9999
      header_name: Authorization
      pattern: "Bearer {token}"
      token: sk-acme
    entities:
      - name: sale
        tag: Sales
        operation_kinds: [retrieve, compute]
"#;

    /// **Scenario**: a full agent.yaml parses; absent timeout fields keep defaults.
    #[test]
    fn parses_agent_yaml() {
        let agent: AgentDescriptor = serde_yaml::from_str(AGENT_YAML).unwrap();
        assert_eq!(agent.provider, "mock");
        assert_eq!(agent.timeouts.execute_ms, 120_000);
        assert_eq!(agent.timeouts.normalize_ms, 20_000);
        assert_eq!(agent.apis.len(), 1);
        let api = &agent.apis[0];
        assert_eq!(api.slug, "acme");
        assert_eq!(api.spec_ref, "apis/acme.yaml");
        assert_eq!(api.entities[0].operation_kinds, vec!["retrieve", "compute"]);
    }

    /// **Scenario**: the auth header substitutes `{token}` in the pattern.
    #[test]
    fn auth_header_substitutes_token() {
        let agent: AgentDescriptor = serde_yaml::from_str(AGENT_YAML).unwrap();
        let (name, value) = agent.apis[0].auth.header().unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer sk-acme");
    }

    /// **Scenario**: no header_name means no auth header at all.
    #[test]
    fn missing_header_name_yields_no_header() {
        let auth = ServiceAuth {
            base_url: "http://x".into(),
            header_name: None,
            pattern: Some("Bearer {token}".into()),
            token: Some("t".into()),
            expires_at: None,
        };
        assert!(auth.header().is_none());
    }
}

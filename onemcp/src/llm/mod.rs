//! Provider-agnostic LLM client abstraction.
//!
//! [`LlmClient`] is the single seam the pipeline talks through: normalization,
//! planning, snippet repair, and summarization all go via [`LlmClient::chat`]
//! with a per-call timeout and cancellation signal. Providers are discovered
//! at init by a stable id through [`ProviderRegistry`]; each factory validates
//! its own configuration and returns a precise [`ConfigError`] listing the
//! missing keys.
//!
//! **Interaction**: the orchestrator builds one client at startup from the
//! agent descriptor's provider id and holds it behind `Arc<dyn LlmClient>`.

mod anthropic;
mod mock;
mod openai;
mod retry;

pub use anthropic::ChatAnthropic;
pub use mock::MockLlm;
pub use openai::ChatOpenAI;
pub use retry::{with_backoff, BackoffPolicy};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// A tool the model may call, in JSON Schema form.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// One tool call returned by the model.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON arguments string as returned by the provider.
    pub arguments: String,
    pub id: Option<String>,
}

/// Token usage reported by the provider, when available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Completion: assistant text plus any tool calls.
#[derive(Clone, Debug, Default)]
pub struct ChatCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: vec![],
            usage: None,
        }
    }
}

/// One chat call: messages, optional tools, per-call timeout, cancel signal.
#[derive(Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: vec![],
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// LLM call error. Transport errors are retryable; semantic errors are not.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Connection, DNS, 5xx, or rate-limit failures. Retried with backoff.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The provider answered but the answer is unusable (4xx, empty choices,
    /// malformed body). Never retried.
    #[error("provider semantic error: {0}")]
    Semantic(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider call cancelled")]
    Cancelled,
}

impl LlmError {
    /// Only transport errors qualify for the bounded-backoff retry loop.
    pub fn is_transport(&self) -> bool {
        matches!(self, LlmError::Transport(_))
    }
}

/// Provider-agnostic chat client.
///
/// `complete` is the provider-specific call; `chat` is the pipeline entry
/// point and wraps it with the request's timeout and cancellation signal.
#[async_trait]
pub trait LlmClient: std::fmt::Debug + Send + Sync {
    /// Stable provider identifier (`openai`, `anthropic`, `mock`, …).
    fn provider_id(&self) -> &str;

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ChatCompletion, LlmError>;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let fut = self.complete(&request.messages, &request.tools);
        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(LlmError::Cancelled),
            res = tokio::time::timeout(request.timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout(request.timeout)),
            },
        }
    }
}

/// Configuration handed to a provider factory.
///
/// `keys` carries provider credentials and endpoints (usually lifted from the
/// environment by the caller); values never appear in logs or errors.
#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub model: String,
    pub keys: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            keys: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    /// Reads `names` from the process environment into `keys` (existing
    /// entries win). Convenience for server startup.
    pub fn with_env_keys(mut self, names: &[&str]) -> Self {
        for name in names {
            if !self.keys.contains_key(*name) {
                if let Ok(v) = std::env::var(name) {
                    self.keys.insert((*name).to_string(), v);
                }
            }
        }
        self
    }
}

/// Provider configuration rejected at construction.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("provider `{provider}` configuration invalid; missing keys: {}", missing.join(", "))]
    MissingKeys {
        provider: String,
        missing: Vec<String>,
    },

    #[error("provider `{provider}` configuration invalid: {message}")]
    Invalid { provider: String, message: String },
}

type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn LlmClient>, ConfigError> + Send + Sync>;

/// Registry of provider factories keyed by stable identifier.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Registry with the built-in providers: `openai`, `anthropic`, `mock`.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("openai", |config| {
            ChatOpenAI::from_config(config).map(|c| Arc::new(c) as Arc<dyn LlmClient>)
        });
        registry.register("anthropic", |config| {
            ChatAnthropic::from_config(config).map(|c| Arc::new(c) as Arc<dyn LlmClient>)
        });
        registry.register("mock", |_config| {
            Ok(Arc::new(MockLlm::default()) as Arc<dyn LlmClient>)
        });
        registry
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn LlmClient>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    /// Builds a client for `id`, validating its configuration.
    pub fn build(
        &self,
        id: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn LlmClient>, ConfigError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))?;
        factory(config)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: builtin registry knows openai, anthropic, and mock.
    #[test]
    fn builtin_registry_ids() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.ids(), vec!["anthropic", "mock", "openai"]);
    }

    /// **Scenario**: building an unknown provider id fails with UnknownProvider.
    #[test]
    fn unknown_provider_rejected() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .build("gemini-flash-9", &ProviderConfig::new("m"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(_)));
    }

    /// **Scenario**: openai factory without an API key lists the missing key by name.
    #[test]
    fn missing_keys_are_named() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .build("openai", &ProviderConfig::new("gpt-4o-mini"))
            .unwrap_err();
        match err {
            ConfigError::MissingKeys { provider, missing } => {
                assert_eq!(provider, "openai");
                assert_eq!(missing, vec!["OPENAI_API_KEY".to_string()]);
            }
            other => panic!("expected MissingKeys, got {other:?}"),
        }
    }

    /// **Scenario**: chat() default wrapper reports Cancelled when the token
    /// is already cancelled, without invoking the provider.
    #[tokio::test]
    async fn chat_honors_pre_cancelled_token() {
        let client = MockLlm::script([ChatCompletion::text("never")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let req = ChatRequest::new(vec![Message::user("hi")]).with_cancel(cancel);
        let err = client.chat(&req).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }
}

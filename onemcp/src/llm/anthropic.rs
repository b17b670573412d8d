//! Anthropic Messages API client implementing `LlmClient`.
//!
//! Talks to `https://api.anthropic.com/v1/messages` over `reqwest` with
//! `x-api-key` / `anthropic-version` headers. System messages are lifted into
//! the request's `system` field; `tool_use` content blocks map to tool calls.
//!
//! **Interaction**: built by [`ProviderRegistry`](super::ProviderRegistry)
//! under the id `anthropic`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::Message;

use super::{
    ChatCompletion, ConfigError, LlmClient, LlmError, LlmUsage, ProviderConfig, ToolCall, ToolSpec,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API client.
#[derive(Debug)]
pub struct ChatAnthropic {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    input_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl ChatAnthropic {
    /// Registry entry point: validates the provider config.
    ///
    /// Required: `ANTHROPIC_API_KEY`. Optional: `ANTHROPIC_BASE_URL`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let api_key = config.keys.get("ANTHROPIC_API_KEY").ok_or_else(|| {
            ConfigError::MissingKeys {
                provider: "anthropic".to_string(),
                missing: vec!["ANTHROPIC_API_KEY".to_string()],
            }
        })?;
        if config.model.is_empty() {
            return Err(ConfigError::Invalid {
                provider: "anthropic".to_string(),
                message: "model must not be empty".to_string(),
            });
        }
        let base_url = config
            .keys
            .get("ANTHROPIC_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.clone(),
            model: config.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Splits our messages into the `system` field and user/assistant turns.
    fn split_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns = Vec::new();
        for m in messages {
            match m {
                Message::System(s) => system_parts.push(s),
                Message::User(s) => turns.push(WireMessage {
                    role: "user",
                    content: s.clone(),
                }),
                Message::Assistant(s) => turns.push(WireMessage {
                    role: "assistant",
                    content: s.clone(),
                }),
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, turns)
    }
}

#[async_trait]
impl LlmClient for ChatAnthropic {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ChatCompletion, LlmError> {
        let (system, turns) = Self::split_messages(messages);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: turns,
            tools: tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: t.description.as_deref(),
                    input_schema: &t.input_schema,
                })
                .collect(),
        };

        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, message_count = messages.len(), tools_count = tools.len(), "anthropic messages create");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(LlmError::Transport(format!("anthropic returned {status}")));
        }
        if !status.is_success() {
            return Err(LlmError::Semantic(format!(
                "anthropic returned {status}: {text}"
            )));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::Semantic(format!("anthropic response parse failed: {e}")))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    name,
                    arguments: input.to_string(),
                    id: Some(id),
                }),
                ContentBlock::Other => {}
            }
        }

        let usage = parsed.usage.map(|u| LlmUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ChatCompletion {
            content,
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: from_config without ANTHROPIC_API_KEY names the missing key.
    #[test]
    fn from_config_requires_api_key() {
        let err = ChatAnthropic::from_config(&ProviderConfig::new("claude-sonnet-4-5")).unwrap_err();
        match err {
            ConfigError::MissingKeys { provider, missing } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(missing, vec!["ANTHROPIC_API_KEY".to_string()]);
            }
            other => panic!("expected MissingKeys, got {other:?}"),
        }
    }

    /// **Scenario**: system messages lift into `system`; turns keep order.
    #[test]
    fn system_messages_are_lifted() {
        let (system, turns) = ChatAnthropic::split_messages(&[
            Message::system("rules"),
            Message::user("question"),
            Message::assistant("answer"),
        ]);
        assert_eq!(system.as_deref(), Some("rules"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    /// **Scenario**: complete() against an unreachable base returns a transport error.
    #[tokio::test]
    async fn complete_with_unreachable_base_returns_error() {
        let config = ProviderConfig::new("claude-sonnet-4-5")
            .with_key("ANTHROPIC_API_KEY", "test-key")
            .with_key("ANTHROPIC_BASE_URL", "http://127.0.0.1:1");
        let client = ChatAnthropic::from_config(&config).unwrap();
        let result = client.complete(&[Message::user("Hello")], &[]).await;
        assert!(matches!(result, Err(LlmError::Transport(_))));
    }
}

//! OpenAI Chat Completions client implementing `LlmClient`.
//!
//! Uses the OpenAI Chat Completions API via `async_openai`. Requires
//! `OPENAI_API_KEY` in the provider config; `OPENAI_BASE_URL` optionally
//! points at an OpenAI-compatible proxy. Optional tools enable `tool_calls`
//! in the response.
//!
//! **Interaction**: built by [`ProviderRegistry`](super::ProviderRegistry)
//! under the id `openai`.

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::message::Message;

use super::{
    ChatCompletion, ConfigError, LlmClient, LlmError, LlmUsage, ProviderConfig, ToolCall, ToolSpec,
};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};

/// OpenAI Chat Completions client.
#[derive(Debug)]
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl ChatOpenAI {
    /// Build client with an explicit config and model.
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature: None,
        }
    }

    /// Registry entry point: validates the provider config.
    ///
    /// Required: `OPENAI_API_KEY`. Optional: `OPENAI_BASE_URL`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let api_key = config.keys.get("OPENAI_API_KEY").ok_or_else(|| {
            ConfigError::MissingKeys {
                provider: "openai".to_string(),
                missing: vec!["OPENAI_API_KEY".to_string()],
            }
        })?;
        if config.model.is_empty() {
            return Err(ConfigError::Invalid {
                provider: "openai".to_string(),
                message: "model must not be empty".to_string(),
            });
        }
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key.as_str());
        if let Some(base) = config.keys.get("OPENAI_BASE_URL") {
            openai_config = openai_config.with_api_base(base.trim_end_matches('/'));
        }
        Ok(Self::with_config(openai_config, config.model.clone()))
    }

    /// Set temperature (0–2). Lower values are more deterministic.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Convert our `Message` list to OpenAI request messages.
    fn messages_to_request(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                Message::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                Message::Assistant(s) => {
                    ChatCompletionRequestMessage::Assistant((s.as_str()).into())
                }
            })
            .collect()
    }

    /// Maps async-openai errors onto the transport/semantic split.
    fn map_error(err: async_openai::error::OpenAIError) -> LlmError {
        match &err {
            async_openai::error::OpenAIError::Reqwest(_)
            | async_openai::error::OpenAIError::StreamError(_) => {
                LlmError::Transport(err.to_string())
            }
            _ => LlmError::Semantic(err.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ChatCompletion, LlmError> {
        let openai_messages = Self::messages_to_request(messages);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(openai_messages);

        if !tools.is_empty() {
            let chat_tools: Vec<ChatCompletionTools> = tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
        }

        if let Some(t) = self.temperature {
            args.temperature(t);
        }

        let request = args
            .build()
            .map_err(|e| LlmError::Semantic(format!("request build failed: {e}")))?;

        debug!(
            model = %self.model,
            message_count = messages.len(),
            tools_count = tools.len(),
            "openai chat create"
        );
        if let Ok(js) = serde_json::to_string(&request) {
            trace!(request = %js, "openai request body");
        }

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(Self::map_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Semantic("openai returned no choices".to_string()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        name: f.function.name,
                        arguments: f.function.arguments,
                        id: Some(f.id),
                    })
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ChatCompletion {
            content,
            tool_calls,
            usage,
        })
    }
}

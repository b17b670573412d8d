//! LLM-backed prompt normalization.
//!
//! Asks the model to emit strict JSON mapping the prompt onto the dictionary
//! vocabulary, then rejects any reply with unknown tokens in the
//! key-contributing positions (action, entities, fields, group_by). A
//! rejected reply surfaces as `NORMALIZATION` and is never cached, so
//! unstable keys cannot pollute the plan cache.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::llm::{with_backoff, BackoffPolicy, ChatRequest, LlmClient, LlmError};
use crate::message::Message;
use crate::prompts;

use super::{Action, Dictionary, Filter, PromptSchema};

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("unknown {position} tokens: {}", tokens.join(", "))]
    UnknownTokens {
        position: &'static str,
        tokens: Vec<String>,
    },

    #[error("normalizer reply unusable: {0}")]
    BadReply(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Workflow of 1..N normalized schema steps.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedPrompt {
    pub steps: Vec<PromptSchema>,
}

impl NormalizedPrompt {
    /// Cache key for the whole workflow. A single step keys as itself;
    /// multi-step workflows hash the ordered step keys.
    pub fn cache_key(&self) -> String {
        if self.steps.len() == 1 {
            return self.steps[0].cache_key();
        }
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(step.cache_key().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Wire shape the model is asked to produce per step.
#[derive(Debug, Deserialize)]
struct WireSchema {
    action: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    params: serde_json::Map<String, Value>,
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    filters: Vec<WireFilter>,
}

#[derive(Debug, Deserialize)]
struct WireFilter {
    field: String,
    op: String,
    value: Value,
}

pub struct Normalizer {
    llm: Arc<dyn LlmClient>,
    backoff: BackoffPolicy,
}

impl Normalizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Normalizes one free-text prompt against the dictionary.
    pub async fn normalize(
        &self,
        prompt: &str,
        dictionary: &Dictionary,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<NormalizedPrompt, NormalizationError> {
        let messages = vec![
            Message::system(prompts::NORMALIZE_SYSTEM),
            Message::user(prompts::render_normalize(dictionary, prompt)),
        ];
        let request = ChatRequest::new(messages)
            .with_timeout(timeout)
            .with_cancel(cancel.clone());

        let completion = with_backoff(self.backoff, cancel, |attempt| {
            debug!(attempt, "normalize llm call");
            let request = request.clone();
            let llm = self.llm.clone();
            async move { llm.chat(&request).await }
        })
        .await?;

        let normalized = parse_reply(&completion.content, dictionary)?;
        debug!(
            steps = normalized.steps.len(),
            cache_key = %normalized.cache_key(),
            "prompt normalized"
        );
        Ok(normalized)
    }
}

/// Parses and validates the model reply (single object, array, or `{steps}`).
pub fn parse_reply(
    reply: &str,
    dictionary: &Dictionary,
) -> Result<NormalizedPrompt, NormalizationError> {
    let text = strip_fences(reply);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| NormalizationError::BadReply(format!("invalid JSON: {e}")))?;

    let raw_steps: Vec<Value> = if let Some(steps) = value.get("steps").and_then(Value::as_array) {
        steps.clone()
    } else if let Value::Array(items) = &value {
        items.clone()
    } else {
        vec![value]
    };

    if raw_steps.is_empty() {
        return Err(NormalizationError::BadReply("no schema steps".to_string()));
    }

    let mut steps = Vec::with_capacity(raw_steps.len());
    for raw in raw_steps {
        let wire: WireSchema = serde_json::from_value(raw)
            .map_err(|e| NormalizationError::BadReply(format!("bad schema step: {e}")))?;
        steps.push(validate_step(wire, dictionary)?);
    }
    Ok(NormalizedPrompt { steps })
}

fn validate_step(
    wire: WireSchema,
    dictionary: &Dictionary,
) -> Result<PromptSchema, NormalizationError> {
    let action: Action =
        wire.action
            .parse()
            .map_err(|_| NormalizationError::UnknownTokens {
                position: "action",
                tokens: vec![wire.action.clone()],
            })?;

    let unknown =
        |position: &'static str, tokens: &[String], known: &dyn Fn(&str) -> bool| {
            let bad: Vec<String> = tokens
                .iter()
                .filter(|t| !known(t))
                .cloned()
                .collect();
            if bad.is_empty() {
                Ok(())
            } else {
                Err(NormalizationError::UnknownTokens {
                    position,
                    tokens: bad,
                })
            }
        };

    unknown("entity", &wire.entities, &|t| dictionary.has_entity(t))?;
    unknown("field", &wire.fields, &|t| dictionary.has_field(t))?;
    unknown("group_by", &wire.group_by, &|t| dictionary.has_field(t))?;

    let mut schema = PromptSchema::new(action);
    schema.entities = wire.entities.into_iter().collect();
    schema.fields = wire.fields.into_iter().collect();
    schema.params = wire.params.into_iter().collect();
    schema.group_by = wire.group_by;
    schema.filters = wire
        .filters
        .into_iter()
        .map(|f| Filter {
            field: f.field,
            op: f.op,
            value: f.value,
        })
        .collect();
    Ok(schema)
}

/// Strips a surrounding markdown code fence, if any.
fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

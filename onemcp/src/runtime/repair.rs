//! Model-assisted compile repair.
//!
//! On compile failure a `/compile` repair prompt carrying the failing
//! snippet and the full diagnostics goes to the LLM; the reply replaces the
//! snippet and compilation retries. After three repair attempts the step
//! fails with the accumulated diagnostics.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::llm::{with_backoff, BackoffPolicy, ChatRequest, LlmClient, LlmError};
use crate::message::Message;
use crate::prompts;

use super::compile::{CompiledSnippet, Compiler};
use super::lang::Diagnostic;

pub const MAX_REPAIR_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum CompileFailure {
    #[error("snippet did not compile after {attempts} repair attempts: {}",
        diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; "))]
    Exhausted {
        attempts: u32,
        diagnostics: Vec<Diagnostic>,
    },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Compiles a snippet, asking the model to repair it on failure.
///
/// Returns the compiled snippet together with the source text that finally
/// compiled (the plan keeps the repaired text for caching).
pub async fn compile_with_repair(
    compiler: &Compiler,
    llm: &Arc<dyn LlmClient>,
    qualified_name: &str,
    source: &str,
    input_vars: &[String],
    output_vars: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(CompiledSnippet, String), CompileFailure> {
    let mut current = source.to_string();
    let mut attempts = 0u32;

    loop {
        match compiler.compile(qualified_name, &current, input_vars, output_vars) {
            Ok(compiled) => {
                if attempts > 0 {
                    info!(qualified_name, attempts, "snippet compiled after repair");
                }
                return Ok((compiled, current));
            }
            Err(diagnostics) => {
                if attempts >= MAX_REPAIR_ATTEMPTS {
                    return Err(CompileFailure::Exhausted {
                        attempts,
                        diagnostics,
                    });
                }
                attempts += 1;
                debug!(
                    qualified_name,
                    attempt = attempts,
                    diagnostics = diagnostics.len(),
                    "requesting snippet repair"
                );

                let rendered: Vec<String> =
                    diagnostics.iter().map(|d| d.to_string()).collect();
                let request = ChatRequest::new(vec![
                    Message::system(prompts::REPAIR_SYSTEM),
                    Message::user(prompts::render_repair(&current, &rendered)),
                ])
                .with_timeout(timeout)
                .with_cancel(cancel.clone());

                let completion = with_backoff(BackoffPolicy::default(), cancel, |_| {
                    let request = request.clone();
                    let llm = llm.clone();
                    async move { llm.chat(&request).await }
                })
                .await?;

                current = strip_fences(&completion.content).to_string();
            }
        }
    }
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

//! Mock LLM for tests.
//!
//! Pops scripted replies in FIFO order; entries may be errors to exercise the
//! retry and repair paths. When the script runs dry the last reply repeats,
//! so single-reply mocks keep working across stages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::Message;

use super::{ChatCompletion, LlmClient, LlmError, ToolSpec};

/// Scripted mock: each `complete` call consumes the next scripted result.
#[derive(Debug)]
pub struct MockLlm {
    script: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    last: Mutex<Option<ChatCompletion>>,
    calls: AtomicUsize,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::script([ChatCompletion::text("ok")])
    }
}

impl MockLlm {
    /// Mock with successful replies only.
    pub fn script(replies: impl IntoIterator<Item = ChatCompletion>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Mock with a full result script (successes and failures).
    pub fn script_results(
        replies: impl IntoIterator<Item = Result<ChatCompletion, LlmError>>,
    ) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Mock replying with the same text forever.
    pub fn with_reply(content: impl Into<String>) -> Self {
        Self::script([ChatCompletion::text(content)])
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    fn provider_id(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ChatCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(reply)) => {
                *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(reply.clone());
                Ok(reply)
            }
            Some(Err(err)) => Err(err),
            None => {
                let last = self
                    .last
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                match last {
                    Some(reply) => Ok(reply),
                    None => Err(LlmError::Semantic("mock script empty".to_string())),
                }
            }
        }
    }
}

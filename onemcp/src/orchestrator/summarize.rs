//! Final summarization: produced variables → human-readable text.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::{with_backoff, BackoffPolicy, ChatRequest, LlmClient, LlmError};
use crate::message::Message;
use crate::prompts;

pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Renders a short summary from the request's produced variables.
    pub async fn summarize(
        &self,
        prompt: &str,
        variables: &Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let request = ChatRequest::new(vec![
            Message::system(prompts::SUMMARIZE_SYSTEM),
            Message::user(prompts::render_summarize(prompt, variables)),
        ])
        .with_timeout(timeout)
        .with_cancel(cancel.clone());

        let completion = with_backoff(BackoffPolicy::default(), cancel, |_| {
            let request = request.clone();
            let llm = self.llm.clone();
            async move { llm.chat(&request).await }
        })
        .await?;
        Ok(completion.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use serde_json::json;

    /// **Scenario**: the summarizer returns the model's trimmed text.
    #[tokio::test]
    async fn returns_trimmed_summary() {
        let summarizer = Summarizer::new(Arc::new(MockLlm::with_reply(
            "  Total sales for 2024 were $123,450.50.\n",
        )));
        let text = summarizer
            .summarize(
                "Show total sales for 2024",
                &json!({"total_sales": 123450.5}),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "Total sales for 2024 were $123,450.50.");
    }
}

//! Bounded exponential backoff for LLM transport errors.
//!
//! Semantic errors never retry; cancellation is checked before each attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::LlmError;

/// Backoff policy: `attempts` total tries, delay doubling from `base`.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub base: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(200),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Runs `op` up to `policy.attempts` times, sleeping between attempts.
/// Retries only when [`LlmError::is_transport`] holds.
pub async fn with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transport() && attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, %err, "transport error, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// **Scenario**: two transport failures then success; three attempts total.
    #[tokio::test]
    async fn retries_transport_until_success() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy {
            attempts: 3,
            base: Duration::from_millis(1),
        };
        let result = with_backoff(policy, &CancellationToken::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Transport("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// **Scenario**: a semantic error is returned immediately, no retry.
    #[tokio::test]
    async fn semantic_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_backoff(BackoffPolicy::default(), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::Semantic("empty choices".into())) }
            })
            .await;
        assert!(matches!(result, Err(LlmError::Semantic(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: the attempt budget is exhausted; the last transport error surfaces.
    #[tokio::test]
    async fn budget_exhausted_returns_last_error() {
        let policy = BackoffPolicy {
            attempts: 2,
            base: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(policy, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Transport("503".into())) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// **Scenario**: a pre-cancelled token short-circuits before the first attempt.
    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_backoff(BackoffPolicy::default(), &cancel, |_| async {
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}

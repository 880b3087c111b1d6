//! Retry with exponential backoff for LM calls.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use docgrab_shared::{DocgrabError, Result};

use crate::{CompletionRequest, CompletionResponse, LlmClient};

/// Backoff policy for failed LM calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per retry.
    pub factor: u32,
    /// Per-call deadline.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            factor: 2,
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry `attempt` (1-based), with ±20% jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay * self.factor.saturating_pow(attempt - 1);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(jitter)
    }
}

/// Run one completion with the policy's deadline and backoff.
///
/// The request is resent unchanged on every attempt; in particular the
/// temperature is never altered between attempts.
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    request: CompletionRequest,
    policy: RetryPolicy,
) -> Result<CompletionResponse> {
    let mut attempt: u32 = 0;

    loop {
        let call = client.complete(request.clone());
        let result = match tokio::time::timeout(policy.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DocgrabError::Llm(format!(
                "{}: call exceeded {}s deadline",
                client.provider_id(),
                policy.call_timeout.as_secs()
            ))),
        };

        match result {
            Ok(response) => return Ok(response),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    provider = client.provider_id(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "llm call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

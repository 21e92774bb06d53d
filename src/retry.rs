use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

/// Bounded retries with exponential backoff, applied per source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts_per_source: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_source: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based) on the same source:
    /// base, 2x base, 4x base, ... capped at `max_delay`.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Run one attempt per call of `attempt` against each source in declared
/// order. The primary source exhausts its retry budget before the first
/// fallback is touched; retryable failures back off between attempts,
/// non-retryable ones rotate to the next source immediately. Returns the
/// winning value and the index of the source that produced it.
pub(crate) async fn run_with_sources<T, F, Fut>(
    policy: &RetryPolicy,
    sources: &[String],
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<(T, usize), DownloadError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let mut last_error = DownloadError::Network("no download sources configured".to_string());

    for (index, url) in sources.iter().enumerate() {
        for attempt_number in 1..=policy.max_attempts_per_source {
            if attempt_number > 1 {
                let delay = policy.backoff_delay(attempt_number - 1);
                tracing::info!(
                    "retrying {url} in {delay:?} (attempt {attempt_number}/{})",
                    policy.max_attempts_per_source
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DownloadError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match attempt(url.clone()).await {
                Ok(value) => return Ok((value, index)),
                Err(DownloadError::Aborted) => return Err(DownloadError::Aborted),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        "attempt {attempt_number}/{} failed for {url}: {err}",
                        policy.max_attempts_per_source
                    );
                    last_error = err;
                }
                Err(err) => {
                    tracing::warn!("source {url} rejected: {err}");
                    last_error = err;
                    break;
                }
            }
        }
    }

    Err(DownloadError::AllSourcesFailed {
        cause: Box::new(last_error),
        attempted: sources.to_vec(),
    })
}

use std::future::Future;
use std::time::Duration;

use ai_client::AiError;
use opportunity_common::file_config::RetryConfig;
use opportunity_common::PipelineError;
use reddit_client::RedditError;
use tracing::warn;

use super::worker_pool::Deadline;

/// One retry policy shared by every external-call wrapper.
///
/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// HTTP errors retry when their status is on the list; connection
    /// errors always retry; everything else is final.
    pub fn is_retryable(&self, err: &anyhow::Error) -> bool {
        if let Some(e) = err.downcast_ref::<RedditError>() {
            return match e.status() {
                Some(status) => self.retryable_statuses.contains(&status),
                None => e.is_transient(),
            };
        }
        if let Some(e) = err.downcast_ref::<AiError>() {
            return match e.status() {
                Some(status) => self.retryable_statuses.contains(&status),
                None => e.is_transient(),
            };
        }
        if let Some(e) = err.downcast_ref::<PipelineError>() {
            return e.is_transient();
        }
        false
    }

    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_until(label, Deadline::never(), op).await
    }

    /// Like [`run`](Self::run) but gives up instead of sleeping past `deadline`.
    pub async fn run_until<T, F, Fut>(
        &self,
        label: &str,
        deadline: Deadline,
        mut op: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && self.is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    if deadline.remaining().is_some_and(|left| left < delay) {
                        warn!(label, attempt, error = %e, "Not retrying, run deadline too close");
                        return Err(e);
                    }
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> anyhow::Error {
        RedditError::Api {
            status: 429,
            message: "Too Many Requests".into(),
        }
        .into()
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy::new(10, Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(3));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn classifies_typed_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&rate_limited()));
        assert!(policy.is_retryable(&AiError::Api { status: 503, message: String::new() }.into()));
        assert!(!policy.is_retryable(&RedditError::Api { status: 404, message: String::new() }.into()));
        assert!(policy.is_retryable(&PipelineError::TransientDependency("x".into()).into()));
        assert!(!policy.is_retryable(&anyhow::anyhow!("plain")));
    }

    #[test]
    fn custom_status_list_is_honoured() {
        let policy = RetryPolicy::default().with_statuses(vec![503]);
        assert!(!policy.is_retryable(&rate_limited()));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(500));
        let result = policy
            .run("search", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("page")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(500));
        let result: anyhow::Result<()> = policy
            .run("search", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = RetryPolicy::default()
            .run("about", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RedditError::Api { status: 403, message: "private".into() }.into())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_deadline_is_closer_than_backoff() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_secs(10));
        let result: anyhow::Result<()> = policy
            .run_until("search", Deadline::after(Duration::from_secs(1)), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

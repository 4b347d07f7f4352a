//! Bounded retry with exponential backoff for individual fetches.

use crate::error::FetchError;
use crate::fetch::{ContentFetcher, Snapshot};
use crate::models::{HistoryReference, MonitoredFile};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        target: "listwatch::retry",
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "{}; retrying",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Applies a [`RetryPolicy`] to every call of the wrapped fetcher.
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: ContentFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: ContentFetcher> ContentFetcher for RetryingFetcher<F> {
    async fn latest(&self) -> Result<HistoryReference, FetchError> {
        self.policy.run("latest", || self.inner.latest()).await
    }

    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError> {
        let what = format!("{}@{}", file, at.short());
        self.policy.run(&what, || self.inner.fetch(file, at)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn test_max_attempts_never_zero() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fetcher = MemoryFetcher::new();
        fetcher.put("c1", "list.txt", "a.com\n");
        fetcher.fail_next("c1", "list.txt", FetchError::Transient("429".into()));
        fetcher.fail_next("c1", "list.txt", FetchError::Transient("503".into()));

        let retrying = RetryingFetcher::new(fetcher.clone(), fast_policy(3));
        let snapshot = retrying
            .fetch(&MonitoredFile::new("list.txt"), &HistoryReference::new("c1"))
            .await
            .unwrap();

        assert_eq!(snapshot, Snapshot::Found("a.com\n".to_string()));
        assert_eq!(fetcher.fetch_count("c1", "list.txt"), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let fetcher = MemoryFetcher::new();
        fetcher.fail_always("c1", "list.txt", FetchError::Transient("timeout".into()));

        let retrying = RetryingFetcher::new(fetcher.clone(), fast_policy(2));
        let err = retrying
            .fetch(&MonitoredFile::new("list.txt"), &HistoryReference::new("c1"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(fetcher.fetch_count("c1", "list.txt"), 2);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let fetcher = MemoryFetcher::new();
        fetcher.fail_always("c1", "list.txt", FetchError::Fatal("401".into()));

        let retrying = RetryingFetcher::new(fetcher.clone(), fast_policy(5));
        let err = retrying
            .fetch(&MonitoredFile::new("list.txt"), &HistoryReference::new("c1"))
            .await
            .unwrap_err();

        assert_eq!(err, FetchError::Fatal("401".into()));
        assert_eq!(fetcher.fetch_count("c1", "list.txt"), 1);
    }
}

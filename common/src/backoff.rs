use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Exponential backoff with full jitter: sleep for a random duration in
/// `[0, min(cap, base * 2^attempt)]`. Shared by driver retry loops and the
/// fabric client's reconnect policy so every caller behaves well under
/// contention instead of retrying in lockstep.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_elapsed: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
            max_elapsed: Some(Duration::from_secs(120)),
        }
    }
}

impl Backoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let pow = if attempt >= 63 { u64::MAX } else { 1u64 << attempt };
        let exp_ms = base_ms.saturating_mul(pow);
        let upper = exp_ms.min(cap_ms).max(1);
        let jitter_ms = rand::random_range(0..=upper);
        Duration::from_millis(jitter_ms)
    }

    /// Runs `op` until it returns `Ok`, a non-retriable error, or
    /// `max_elapsed` has passed. `should_retry` lets callers distinguish
    /// transient errors (etcd member list, package pulls) from terminal
    /// ones that must propagate immediately.
    pub async fn retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut should_retry: impl FnMut(&Error) -> bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let start = tokio::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !should_retry(&e) {
                        return Err(e);
                    }
                    if let Some(max) = self.max_elapsed
                        && start.elapsed() >= max
                    {
                        return Err(e.wrap("retry budget exhausted"));
                    }
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(Error::LimitExceeded("cancelled while retrying".into()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Waits, honoring cancellation, until `n` attempts of `poll` report `true`
/// backoff intervals have elapsed or `poll` reports readiness. Used by
/// drivers to poll for quorum/operation completion every few seconds with
/// an overall deadline.
pub async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    mut poll: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if poll().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::LimitExceeded(format!(
                "timed out after {:?} waiting for condition",
                timeout
            )));
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::LimitExceeded("cancelled while waiting".into()));
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

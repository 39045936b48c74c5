//! Bounded retry with optional exponential backoff.
//!
//! `Retry` is a pure control-flow combinator: it calls the operation, consults
//! the error's [`Retryable`] classification, optionally notifies `on_retry`
//! and sleeps between attempts. It never inspects the success value.

use std::future::Future;
use std::time::Duration;

use crate::services::config::{env_bool, env_u64};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Classification the retry loop needs from an error type.
pub trait Retryable {
    /// Cancelled / superseded operations are never retried.
    fn is_abort(&self) -> bool;

    /// HTTP-like status carried by the error, if any.
    fn status(&self) -> Option<u16>;

    /// Error returned if the loop exits without a result.
    fn exhausted() -> Self;
}

fn is_client_error<E: Retryable>(err: &E) -> bool {
    matches!(err.status(), Some(status) if (400..500).contains(&status))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            backoff: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
        }
    }

    /// Reads `CHAT_RETRY_MAX_ATTEMPTS`, `CHAT_RETRY_DELAY_MS` and `CHAT_RETRY_BACKOFF`.
    pub fn from_env() -> Self {
        let max_attempts = env_u64("CHAT_RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS as u64).clamp(1, 20);
        let delay = Duration::from_millis(
            env_u64("CHAT_RETRY_DELAY_MS", DEFAULT_DELAY.as_millis() as u64).clamp(0, 60_000),
        );
        let backoff = env_bool("CHAT_RETRY_BACKOFF", true);

        Self::new(max_attempts as u32, delay, backoff)
    }

    /// Wait after the 1-based `attempt` failed.
    pub fn wait_for(&self, attempt: u32) -> Duration {
        if !self.backoff {
            return self.delay;
        }

        let exp_shift = attempt.saturating_sub(1).min(30);
        let base_ms = self.delay.as_millis() as u64;
        let raw_ms = base_ms.saturating_mul(1u64 << exp_shift);
        Duration::from_millis(raw_ms)
    }
}

type RetryHook<'a, E> = Box<dyn FnMut(u32, &E) + Send + 'a>;

pub struct Retry<'a, E> {
    policy: RetryPolicy,
    on_retry: Option<RetryHook<'a, E>>,
}

impl<'a, E: Retryable> Retry<'a, E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_retry: None,
        }
    }

    /// Observe each retry with the attempt number that just failed.
    pub fn on_retry(mut self, hook: impl FnMut(u32, &E) + Send + 'a) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    pub async fn run<T, F, Fut>(mut self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        while attempt < max_attempts {
            attempt += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_abort() || is_client_error(&err) || attempt >= max_attempts {
                        return Err(err);
                    }

                    if let Some(hook) = self.on_retry.as_mut() {
                        hook(attempt, &err);
                    }

                    let wait = self.policy.wait_for(attempt);
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(E::exhausted())
    }
}

/// Shorthand for `Retry::new(policy).run(operation)`.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, operation: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry::new(policy).run(operation).await
}

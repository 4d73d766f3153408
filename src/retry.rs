//! Retry wrapper with exponential backoff and jitter.
//!
//! The policy is plain configuration data; the wrapper is applied explicitly
//! at the call site of external-dependency calls (engine invocations,
//! scheduled tasks) rather than hidden behind the operations themselves.

use std::future::Future;
use std::time::Duration;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Backoff schedule for retried operations.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay_ms")]
    initial_delay_ms: u64,
    /// Ceiling on any single delay.
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_base")]
    backoff_base: f64,
    /// Adds up to 10% random slack to each delay.
    #[serde(default = "default_jitter")]
    jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_base: default_backoff_base(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings.
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_base: f64,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            backoff_base,
            jitter,
        }
    }

    /// A policy suited to tests: immediate retries, no jitter.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0, 1.0, false)
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let mut millis =
            (self.initial_delay_ms as f64 * self.backoff_base.powi(exponent)).min(self.max_delay_ms as f64);
        if self.jitter {
            millis += millis * 0.1 * rand::random::<f64>();
        }
        Duration::from_millis(millis as u64)
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted,
/// sleeping with exponential backoff between attempts. The final error is
/// returned unchanged.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= *policy.max_attempts() => {
                error!(
                    operation,
                    attempts = attempt,
                    error = %e,
                    "Operation failed after final attempt"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(&RetryPolicy::immediate(3), "noop", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(&RetryPolicy::immediate(5), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("failure {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(&RetryPolicy::immediate(3), "doomed", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still broken") }
        })
        .await;
        assert_eq!(result, Err("still broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_is_capped_by_max() {
        let policy = RetryPolicy::new(10, 1_000, 4_000, 2.0, false);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(8), Duration::from_millis(4_000));
    }
}

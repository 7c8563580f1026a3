//! Caller-configured retry of transient backend failures.
//!
//! The store never retries on its own initiative: the default policy makes exactly one
//! attempt. When a caller opts in, only errors for which
//! [`RelationshipStoreError::is_retriable`] holds are retried. Every mutation is idempotent
//! or guard-protected, so replaying one after an ambiguous failure cannot corrupt state.

use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::warn;

use crate::error::{RelationshipStoreError, RelationshipStoreResult};

/// Exponential backoff policy for transient failures.
///
/// # Example
///
/// ```ignore
/// use relset_core::retry::RetryPolicy;
///
/// // Up to 5 attempts: 50ms, 100ms, 200ms, 400ms between them.
/// let policy = RetryPolicy::exponential(5).initial_backoff_ms(50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Growth factor applied to the delay after each failed attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }

    /// Exponential backoff with `max_attempts` total attempts.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::none()
        }
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);

        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }

    /// Checks the policy for values that cannot produce a sensible schedule.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipStoreError::Configuration`] for a non-finite or sub-1 multiplier,
    /// or an initial backoff larger than the maximum.
    pub fn validate(&self) -> RelationshipStoreResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(RelationshipStoreError::Configuration(format!(
                "retry multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(RelationshipStoreError::Configuration(format!(
                "initial backoff {}ms exceeds max backoff {}ms",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }

        Ok(())
    }

    /// Runs `operation` until it succeeds, fails with a non-retriable error, or the attempts
    /// are exhausted. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> RelationshipStoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RelationshipStoreResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn().await {
                Err(err) if err.is_retriable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::exponential(10)
            .initial_backoff_ms(100)
            .max_backoff_ms(1_000);

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::none().validate().is_ok());
        assert!(RetryPolicy::none().multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::none().multiplier(f64::NAN).validate().is_err());
        assert!(
            RetryPolicy::none()
                .initial_backoff_ms(10)
                .max_backoff_ms(5)
                .validate()
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::exponential(3);

        let result = policy
            .run("add", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RelationshipStoreError::Throttled("busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::exponential(2);

        let result: RelationshipStoreResult<()> = policy
            .run("add", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RelationshipStoreError::BackendUnavailable("down".into()))
            })
            .await;

        assert!(matches!(result, Err(RelationshipStoreError::BackendUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_never_retries_guard_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::exponential(5);

        let result: RelationshipStoreResult<()> = policy
            .run("remove", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RelationshipStoreError::NotFound {
                    owner: "U1".into(),
                    member: "F1".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(RelationshipStoreError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{ "max_attempts": 4 }"#).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_backoff_ms, RetryPolicy::none().initial_backoff_ms);
    }
}

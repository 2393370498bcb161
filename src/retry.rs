// 🔁 Retry Policy - bounded backoff for serialization conflicts
//
// Only `EngineError::SerializationFailure` is retried. Every other error is
// terminal for the request and returned on the first attempt.

use crate::error::EngineResult;
use rand::Rng;
use std::time::Duration;

/// Retry configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 20,
            max_delay_ms: 500,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Exponential backoff clamped to `max_delay_ms`, with ±jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails terminally, or retries run out
    pub fn run<T, F>(&self, operation_name: &str, mut operation: F) -> EngineResult<T>
    where
        F: FnMut() -> EngineResult<T>,
    {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "conflict detected, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::cell::Cell;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000)); // clamped
    }

    #[test]
    fn test_retry_eventual_success() {
        let calls = Cell::new(0);
        let result = fast_policy(3).run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(EngineError::SerializationFailure("busy".to_string()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_is_bounded() {
        let calls = Cell::new(0);
        let result: EngineResult<()> = fast_policy(2).run("test", || {
            calls.set(calls.get() + 1);
            Err(EngineError::SerializationFailure("busy".to_string()))
        });

        assert!(matches!(result, Err(EngineError::SerializationFailure(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_terminal_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: EngineResult<()> = fast_policy(5).run("test", || {
            calls.set(calls.get() + 1);
            Err(EngineError::OwnershipMismatch { account_id: 1, item_id: 10 })
        });

        assert!(matches!(result, Err(EngineError::OwnershipMismatch { .. })));
        assert_eq!(calls.get(), 1);
    }
}

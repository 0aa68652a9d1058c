//! Retry policies.
//!
//! Retry parameters live beside each activity declaration; activities do not
//! carry retry loops inside their bodies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorCode, OrchestratorError};

/// Retry policy for one activity declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Multiplier applied per attempt
    pub backoff_coefficient: f64,
    /// Ceiling for any single delay
    pub max_interval: Duration,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Error codes never retried even when the class is retryable
    pub non_retryable: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 3,
            non_retryable: vec![
                ErrorCode::ValidationError,
                ErrorCode::PermissionError,
                ErrorCode::QuotaExceeded,
            ],
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

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Override the initial interval.
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Add a non-retryable code.
    pub fn with_non_retryable(mut self, code: ErrorCode) -> Self {
        if !self.non_retryable.contains(&code) {
            self.non_retryable.push(code);
        }
        self
    }

    /// Backoff delay before retrying after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let scaled =
            self.initial_interval.as_millis() as f64 * self.backoff_coefficient.powi(exp as i32);
        let capped = scaled.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether a failed `attempt` (1-based) should be retried.
    pub fn should_retry(&self, err: &OrchestratorError, attempt: u32) -> bool {
        attempt < self.max_attempts
            && err.is_retryable()
            && !self.non_retryable.contains(&err.code())
    }
}

/// Options for one activity invocation.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Retry policy
    pub retry: RetryPolicy,
    /// Start-to-close timeout for a single attempt
    pub start_to_close: Duration,
    /// Heartbeat interval for long activities; cancellation is observed
    /// between heartbeats
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            start_to_close: Duration::from_secs(300),
            heartbeat_timeout: None,
        }
    }
}

impl ActivityOptions {
    /// Options with no retries.
    pub fn no_retry() -> Self {
        Self {
            retry: RetryPolicy::none(),
            ..Default::default()
        }
    }

    /// Override the single-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close = timeout;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable heartbeating.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_timeout = Some(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(5),
            max_attempts: 10,
            non_retryable: vec![],
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5)); // capped
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_respects_class() {
        let policy = RetryPolicy::default();

        let transient = OrchestratorError::Transient("x".into());
        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3)); // budget exhausted

        let permission = OrchestratorError::Permission("x".into());
        assert!(!policy.should_retry(&permission, 1));
    }

    #[test]
    fn test_non_retryable_override() {
        let policy = RetryPolicy::default().with_non_retryable(ErrorCode::ProviderError);
        let provider = OrchestratorError::Provider("x".into());
        assert!(!policy.should_retry(&provider, 1));
    }
}

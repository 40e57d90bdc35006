use std::time::Duration;

use crate::config::DispatcherConfig;
use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry(Duration),
    Fail,
}

/// Decides what happens after a failed attempt. Pure: no clocks, no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    /// Timeouts and exceptions are treated alike.
    pub fn next_action(&self, attempt: u32, _error: &StageError) -> RetryAction {
        if attempt == 0 || attempt > self.max_retries {
            return RetryAction::Fail;
        }
        RetryAction::Retry(self.backoff(attempt))
    }

    /// `base * 2^(attempt-1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_max, |delay| delay.min(self.backoff_max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageName;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(250),
        }
    }

    fn timeout() -> StageError {
        StageError::Timeout {
            stage: Some(StageName::MediaTagging),
            after: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_retries_then_fails() {
        let policy = policy();
        let err = StageError::exception(StageName::Sentiment, "boom");
        assert_eq!(
            policy.next_action(1, &err),
            RetryAction::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            policy.next_action(2, &err),
            RetryAction::Retry(Duration::from_millis(200))
        );
        assert_eq!(policy.next_action(3, &err), RetryAction::Fail);
    }

    #[test]
    fn test_timeouts_follow_the_same_policy() {
        let policy = policy();
        assert_eq!(
            policy.next_action(1, &timeout()),
            RetryAction::Retry(Duration::from_millis(100))
        );
        assert_eq!(policy.next_action(3, &timeout()), RetryAction::Fail);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 40,
            ..policy()
        };
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.backoff(40), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_retries_fails_immediately() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..policy()
        };
        assert_eq!(policy.next_action(1, &timeout()), RetryAction::Fail);
    }

    #[test]
    fn test_default_allows_two_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert!(matches!(policy.next_action(2, &timeout()), RetryAction::Retry(_)));
    }
}

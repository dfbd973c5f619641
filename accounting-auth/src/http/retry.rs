//! Backoff policy for provider data requests.
//!
//! `reqwest-retry` only consults the policy for transient outcomes (connect
//! errors, timeouts, 429, 5xx). Token refresh clients are built without it.

use std::time::{Duration, SystemTime};

use reqwest_retry::{RetryDecision, RetryPolicy};

/// Doubling delay from `base_delay`, capped at `max_delay`, that stops after
/// `max_retries` attempts or once the next attempt would start later than
/// `retry_deadline` after the first one.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    retry_deadline: Duration,
}

impl BackoffPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            retry_deadline: Duration::from_secs(120),
        }
    }

    /// Bound the total time a request may spend being retried.
    pub fn with_retry_deadline(mut self, retry_deadline: Duration) -> Self {
        self.retry_deadline = retry_deadline;
        self
    }

    fn delay(&self, n_past_retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(n_past_retries);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl RetryPolicy for BackoffPolicy {
    fn should_retry(&self, request_start_time: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_retries {
            return RetryDecision::DoNotRetry;
        }

        let execute_after = SystemTime::now() + self.delay(n_past_retries);
        let past_deadline = execute_after
            .duration_since(request_start_time)
            .map(|elapsed| elapsed > self.retry_deadline)
            .unwrap_or(false);
        if past_deadline {
            return RetryDecision::DoNotRetry;
        }

        RetryDecision::Retry { execute_after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = BackoffPolicy::new(10);

        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(9), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn stops_after_max_retries() {
        let policy = BackoffPolicy::new(2);

        assert!(matches!(
            policy.should_retry(SystemTime::now(), 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(SystemTime::now(), 2),
            RetryDecision::DoNotRetry
        ));
    }

    #[test]
    fn stops_once_the_retry_deadline_has_passed() {
        let policy = BackoffPolicy::new(5).with_retry_deadline(Duration::from_secs(10));
        let started = SystemTime::now() - Duration::from_secs(9);

        // The next attempt would start 9.5s after the first one.
        assert!(matches!(
            policy.should_retry(started, 0),
            RetryDecision::Retry { .. }
        ));
        // 9s + 2s lands past the 10s deadline.
        assert!(matches!(
            policy.should_retry(started, 2),
            RetryDecision::DoNotRetry
        ));
    }
}

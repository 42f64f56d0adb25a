//! Backoff policy for batch fetches.

use std::time::Duration;

use extractor_core::FetchSpec;

/// Retry policy for one batch.
///
/// `max_retries` counts calls made after the first one, so a batch sees at
/// most `1 + max_retries` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = no retries)
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each following one
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn from_spec(spec: &FetchSpec) -> Self {
        Self::new(spec.max_retry_attempts, spec.initial_retry_delay)
    }

    /// Delay before retry `attempt` (1-indexed): `initial_delay * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn delays_double_from_initial() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(16));
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1));
        assert!(policy.delay_for_attempt(200) >= policy.delay_for_attempt(31));
    }

    #[test]
    fn zero_means_no_retries() {
        assert!(!RetryPolicy::no_retry().should_retry(0));

        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    proptest! {
        #[test]
        fn delay_matches_formula(initial_ms in 1u64..5_000, attempt in 1u32..16) {
            let policy = RetryPolicy::new(16, Duration::from_millis(initial_ms));
            let expected = Duration::from_millis(initial_ms * (1u64 << (attempt - 1)));
            prop_assert_eq!(policy.delay_for_attempt(attempt), expected);
        }
    }
}

//! Retry policy: decides backoff delays.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with an optional cap and jitter.
///
/// delay(n) = min(base_delay * multiplier^n, max_delay), where `n` is the
/// retry_count *before* the retry being scheduled (0 for the first retry).
///
/// Example with base_delay=60s, multiplier=2.0, max_delay=1h:
/// - first retry: 60s
/// - second retry: 120s
/// - third retry: 240s
/// - seventh retry and later: 3600s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay (0.0..=1.0) randomly subtracted, to spread retries out.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt, given how many retries already happened.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        // powi can overflow to inf or go NaN with odd multipliers.
        let capped = if capped.is_finite() && capped >= 0.0 {
            capped
        } else {
            self.max_delay.as_secs_f64()
        };

        let delay = Duration::from_secs_f64(capped);
        if self.jitter > 0.0 {
            let shave = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay.mul_f64(1.0 - shave)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(3600));
        assert_eq!(policy.jitter, 0.0);
    }

    #[rstest]
    #[case(0, 60)]
    #[case(1, 120)]
    #[case(2, 240)]
    #[case(5, 1920)]
    #[case(6, 3600)]
    #[case(40, 3600)]
    #[case(u32::MAX, 3600)]
    fn exponential_backoff_is_capped(#[case] retry_count: u32, #[case] secs: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(retry_count), Duration::from_secs(secs));
    }

    #[test]
    fn jitter_only_shortens_the_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 2.0).with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.next_delay(1);
            assert!(d <= Duration::from_secs(20));
            assert!(d >= Duration::from_secs(10));
        }
    }

    #[test]
    fn jitter_is_clamped() {
        let policy = RetryPolicy::default().with_jitter(7.0);
        assert_eq!(policy.jitter, 1.0);
    }
}

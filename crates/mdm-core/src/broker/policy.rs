//! Retry backoff policy for nacked queue items.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter. Attempt numbers are 1-based; the delay
/// for re-running after attempt `n` failed is `base * factor^(n-1)`, spread
/// by `±jitter` to keep retries from synchronizing.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub factor: u32,
    /// Jitter fraction, e.g. 0.2 for ±20%.
    pub jitter: f64,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(5),
            factor: 2,
            jitter: 0.2,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Whether another attempt may run after `attempt` attempts have failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following failed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1).min(16));
        let raw = self.base_delay.saturating_mul(exp).min(self.max_delay);
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        raw.mul_f64((1.0 + spread).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_cap() {
        let p = BackoffPolicy::default();
        assert!(p.allows_retry(1));
        assert!(!p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    #[test]
    fn delay_grows_and_stays_within_jitter() {
        let p = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            factor: 2,
            jitter: 0.2,
            max_delay: Duration::from_secs(300),
        };
        for _ in 0..50 {
            let d1 = p.delay_after(1).as_secs_f64();
            assert!((4.0..=6.0).contains(&d1), "first backoff 5s ±20%, got {d1}");
            let d2 = p.delay_after(2).as_secs_f64();
            assert!((8.0..=12.0).contains(&d2), "second backoff 10s ±20%, got {d2}");
        }
    }

    #[test]
    fn delay_is_capped() {
        let p = BackoffPolicy {
            max_attempts: 20,
            base_delay: Duration::from_secs(5),
            factor: 2,
            jitter: 0.0,
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(p.delay_after(10), Duration::from_secs(60));
    }
}

//! Retry policy for transient provider failures
//!
//! Exponential backoff with jitter: attempt `n` (1-based) sleeps
//! `base * factor^(n-1)` scaled by a uniform factor in `[1-jitter, 1+jitter]`.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Fractional jitter, e.g. 0.2 for ±20 %
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// The sleep before retrying after a failed `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.factor.powi(attempt.saturating_sub(1) as i32);
        let scale = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(exp * scale)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_within_jitter() {
        let policy = RetryPolicy::default();
        for _ in 0..32 {
            let d1 = policy.delay_for(1).as_secs_f64();
            let d2 = policy.delay_for(2).as_secs_f64();
            let d3 = policy.delay_for(3).as_secs_f64();
            assert!((0.8..=1.2).contains(&d1), "d1 = {d1}");
            assert!((1.6..=2.4).contains(&d2), "d2 = {d2}");
            assert!((3.2..=4.8).contains(&d3), "d3 = {d3}");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}

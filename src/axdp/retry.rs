//! Exponential retry policy for AXDP ACK/NACK (spec §4.2).

use crate::clock::Jitter;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub max_retries: u32,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_retries: 8,
            jitter_fraction: 0.0,
        }
    }
}

impl RetryPolicy {
    /// `interval(attempt) = min(maxInterval, baseInterval * 2^attempt)`,
    /// perturbed by `± jitterFraction * interval` when jitter is configured.
    pub fn interval(&self, attempt: u32, jitter: &dyn Jitter) -> Duration {
        let scale = 2u64.saturating_pow(attempt.min(32));
        let unclamped_nanos = (self.base_interval.as_nanos()).saturating_mul(scale as u128);
        let capped = if unclamped_nanos > self.max_interval.as_nanos() {
            self.max_interval
        } else {
            Duration::from_nanos(unclamped_nanos.min(u64::MAX as u128) as u64)
        };
        if self.jitter_fraction == 0.0 {
            return capped;
        }
        let sample = jitter.sample(); // in [-1.0, 1.0)
        let delta = capped.as_secs_f64() * self.jitter_fraction * sample;
        let jittered = (capped.as_secs_f64() + delta).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedJitter;

    #[test]
    fn interval_doubles_until_capped() {
        let p = RetryPolicy {
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_retries: 10,
            jitter_fraction: 0.0,
        };
        let j = FixedJitter::zero();
        assert_eq!(p.interval(0, &j), Duration::from_secs(1));
        assert_eq!(p.interval(1, &j), Duration::from_secs(2));
        assert_eq!(p.interval(2, &j), Duration::from_secs(4));
        assert_eq!(p.interval(10, &j), Duration::from_secs(10)); // capped
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let p = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert!(p.should_retry(0));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }
}

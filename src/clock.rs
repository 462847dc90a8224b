//! Injectable time and randomness sources.
//!
//! The core never reads the system clock or a global RNG directly (spec
//! §5): every timestamp flows through a `Clock`, every retry-interval
//! jitter sample through a `Jitter`. Production code uses `SystemClock`
//! and `ThreadJitter`; tests substitute `FakeClock` and `FixedJitter` for
//! deterministic behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Production clock backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A deterministic clock for tests: starts at a fixed instant and only
/// advances when told to.
#[derive(Debug)]
pub struct FakeClock {
    micros_since_epoch: AtomicU64,
}

impl FakeClock {
    pub fn at(t: SystemTime) -> Self {
        let micros = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self {
            micros_since_epoch: AtomicU64::new(micros),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.micros_since_epoch
            .fetch_add(d.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, t: SystemTime) {
        let micros = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        self.micros_since_epoch.store(micros, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::at(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.micros_since_epoch.load(Ordering::SeqCst))
    }
}

/// A source of jitter samples in `[-1.0, 1.0)`, used only to perturb retry
/// intervals (spec §4.2).
pub trait Jitter: Send + Sync {
    fn sample(&self) -> f64;
}

/// Production jitter source backed by `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadJitter;

impl Jitter for ThreadJitter {
    fn sample(&self) -> f64 {
        use rand::Rng;
        rand::rng().random_range(-1.0..1.0)
    }
}

/// A fixed-sequence jitter source for deterministic tests.
pub struct FixedJitter {
    values: Vec<f64>,
    next: AtomicU64,
}

impl FixedJitter {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty());
        Self {
            values,
            next: AtomicU64::new(0),
        }
    }

    pub fn zero() -> Self {
        Self::new(vec![0.0])
    }
}

impl Jitter for FixedJitter {
    fn sample(&self) -> f64 {
        let i = self.next.fetch_add(1, Ordering::SeqCst) as usize % self.values.len();
        self.values[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_only_when_told() {
        let c = FakeClock::at(UNIX_EPOCH + Duration::from_secs(100));
        assert_eq!(c.now(), UNIX_EPOCH + Duration::from_secs(100));
        c.advance(Duration::from_secs(5));
        assert_eq!(c.now(), UNIX_EPOCH + Duration::from_secs(105));
    }

    #[test]
    fn fixed_jitter_cycles() {
        let j = FixedJitter::new(vec![0.1, -0.1]);
        assert_eq!(j.sample(), 0.1);
        assert_eq!(j.sample(), -0.1);
        assert_eq!(j.sample(), 0.1);
    }
}

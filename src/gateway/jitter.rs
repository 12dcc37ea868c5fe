use std::time::Duration;

use rand::Rng;

/// Source of random delays. Substitutable so tests can pin exact schedules.
pub trait Jitter: Send + Sync + 'static {
    /// A delay drawn uniformly from `[low, high)`. Returns `low` when the
    /// range is empty.
    fn between(&self, low: Duration, high: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl Jitter for ThreadRngJitter {
    fn between(&self, low: Duration, high: Duration) -> Duration {
        if high <= low {
            return low;
        }
        rand::thread_rng().gen_range(low..high)
    }
}

/// Always picks the same relative position inside the range.
///
/// `FixedJitter::new(0.0)` yields `low`; values approaching 1.0 approach
/// `high` without reaching it.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter {
    fraction: f64,
}

impl FixedJitter {
    pub fn new(fraction: f64) -> Self {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { fraction }
    }
}

impl Jitter for FixedJitter {
    fn between(&self, low: Duration, high: Duration) -> Duration {
        if high <= low {
            return low;
        }
        let span = high - low;
        let offset = span.mul_f64(self.fraction);
        if offset >= span {
            // Keep the upper bound exclusive.
            return high - Duration::from_nanos(1);
        }
        low + offset
    }
}

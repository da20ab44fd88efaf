//! Exponential backoff with jitter for the reconnect loop (§4.4.3).
//!
//! Hand-rolled rather than pulled from a crate: the policy is a handful of
//! fields and one method, and the teacher's own recovery manager rolls its
//! own rather than reaching for `backoff`.

use std::time::Duration;

use rand::Rng;

const INITIAL: Duration = Duration::from_millis(500);
const MAX: Duration = Duration::from_secs(60);
const FACTOR: f64 = 1.5;
const RANDOMIZATION: f64 = 0.5;

pub struct Backoff {
    current: Duration,
    factor: f64,
    randomization: f64,
    max: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_params(INITIAL, FACTOR, RANDOMIZATION, MAX)
    }

    /// Builds a backoff with explicit parameters; production code always
    /// goes through `new()`. Exposed so tests can pin `randomization` at
    /// `0.0` for deterministic timing assertions.
    pub fn with_params(initial: Duration, factor: f64, randomization: f64, max: Duration) -> Self {
        Self { current: initial, factor, randomization, max }
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// internal state. Never resets on its own — callers reset after a
    /// connection has stayed up long enough to be considered recovered, or
    /// construct a fresh `Backoff` per target.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let jitter_range = base.as_secs_f64() * self.randomization;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let delay = (base.as_secs_f64() + jitter).max(0.0);

        self.current = Duration::from_secs_f64((base.as_secs_f64() * self.factor).min(self.max.as_secs_f64()));

        Duration::from_secs_f64(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_geometrically_and_caps_at_max() {
        let mut b = Backoff::new();
        for _ in 0..40 {
            let d = b.next_delay();
            assert!(d <= MAX + Duration::from_secs(1));
        }
        assert!(b.current <= MAX);
    }
}

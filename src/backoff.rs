use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use crate::retry::ExponentialBackoffPolicy;

const DEFAULT_JITTER: f64 = 0.114_043_017_5;

/// Produces an exponentially growing, jittered delay sequence.
///
/// `delay` returns the current interval and then advances it: the next value
/// is sampled from a normal distribution centered at `current * scale` with a
/// standard deviation of `jitter` times the mean, clamped to
/// `[0, max_delay]`. The generator is seeded from the operating system, and
/// it is `Send` so it can live across await points inside the retry driver.
pub(crate) struct ExponentialBackoff {
    policy: ExponentialBackoffPolicy,
    rng: StdRng,
    current: Duration,
    jitter: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub(crate) fn new(policy: ExponentialBackoffPolicy) -> Self {
        Self {
            current: policy.initial_delay,
            policy,
            rng: StdRng::from_os_rng(),
            jitter: DEFAULT_JITTER,
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    pub(crate) fn retry_count(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn delay(&mut self) -> Duration {
        self.attempt += 1;
        let current = self.current;
        self.calculate_next();
        current
    }

    fn calculate_next(&mut self) {
        let max_ms = self.policy.max_delay.as_millis() as f64;
        let mut next_ms = self.current.as_millis() as f64 * self.policy.scale;
        if next_ms > max_ms {
            next_ms = max_ms;
        }

        if self.jitter >= 1e-4 {
            let sigma = self.jitter * next_ms;
            if let Ok(dist) = Normal::new(next_ms, sigma) {
                next_ms = self.rng.sample(dist);
            }
        }

        self.current = Duration::from_millis(next_ms.max(0.0) as u64).min(self.policy.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_the_initial_delay() {
        let policy = ExponentialBackoffPolicy::default();
        for _ in 0..100 {
            let mut backoff = ExponentialBackoff::new(policy);
            assert_eq!(backoff.delay(), policy.initial_delay);
        }
    }

    #[test]
    fn delays_never_exceed_the_cap() {
        let policy = ExponentialBackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            scale: 2.0,
        };
        let mut backoff = ExponentialBackoff::new(policy);
        for _ in 0..1000 {
            assert!(backoff.delay() <= policy.max_delay);
        }
    }

    #[test]
    fn delays_grow_toward_the_cap() {
        let policy = ExponentialBackoffPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            scale: 2.0,
        };
        // Averaged over many runs the fifth delay must sit well above the
        // first: mean growth is 2x per step, jitter sigma is ~11%.
        let mut sum = Duration::ZERO;
        for _ in 0..200 {
            let mut backoff = ExponentialBackoff::new(policy);
            for _ in 0..4 {
                backoff.delay();
            }
            sum += backoff.delay();
        }
        let average = sum / 200;
        assert!(average > Duration::from_millis(80), "average was {average:?}");
    }

    #[test]
    fn attempts_are_counted() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffPolicy::default());
        assert_eq!(backoff.retry_count(), 0);
        backoff.delay();
        backoff.delay();
        assert_eq!(backoff.retry_count(), 2);
    }
}

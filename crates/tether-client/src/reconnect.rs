//! Exponential backoff for reconnection

use std::num::NonZeroU32;
use std::time::Duration;

use rand::Rng;
use tether_core::config::BackoffConfig;

/// Computes the delay before a reconnect attempt
///
/// `delay(n) = min(max, initial * multiplier^(n-1)) + jitter` where the jitter
/// is drawn uniformly from `[0, jitter)` after the cap, so a jittered delay
/// may slightly exceed `max`. The scheduler keeps no attempt state; the
/// caller owns the counter.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    /// Delay for the first attempt
    initial: Duration,
    /// Cap applied before jitter
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Exclusive upper bound of the jitter
    jitter: Duration,
}

impl BackoffScheduler {
    /// Create a scheduler from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial_delay,
            max: config.max_delay,
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Create a scheduler with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Delay for `attempt` including random jitter
    pub fn next_delay(&self, attempt: NonZeroU32) -> Duration {
        self.capped_delay(attempt) + self.sample_jitter()
    }

    /// Deterministic part of the delay: the exponential term capped at `max`
    pub fn capped_delay(&self, attempt: NonZeroU32) -> Duration {
        let exponent = f64::from(attempt.get() - 1);
        let nanos = self.initial.as_nanos() as f64 * self.multiplier.powf(exponent);

        // Overflow and NaN saturate to the cap
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        std::cmp::min(Duration::from_nanos(nanos.round() as u64), self.max)
    }

    /// Upper bound of any delay this scheduler returns (exclusive when jitter is set)
    pub fn max_total_delay(&self) -> Duration {
        self.max + self.jitter
    }

    fn sample_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn test_backoff_increases() {
        let backoff = BackoffScheduler::new(
            Duration::from_millis(100),
            Duration::from_secs(60),
            2.0,
            Duration::ZERO, // No jitter for deterministic test
        );

        assert_eq!(backoff.next_delay(attempt(1)), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(attempt(2)), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(attempt(3)), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_max() {
        let backoff = BackoffScheduler::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
            2.0,
            Duration::ZERO,
        );

        assert_eq!(backoff.next_delay(attempt(1)), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(attempt(2)), Duration::from_secs(60)); // Capped at max
        assert_eq!(backoff.next_delay(attempt(3)), Duration::from_secs(60)); // Still capped
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let backoff = BackoffScheduler::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
            10.0,
            Duration::ZERO,
        );
        assert_eq!(backoff.capped_delay(attempt(u32::MAX)), Duration::from_secs(5));
    }

    #[test]
    fn test_capped_component_is_monotonic() {
        let backoff = BackoffScheduler::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            1.5,
            Duration::from_millis(1000),
        );

        let mut previous = Duration::ZERO;
        for n in 1..64 {
            let capped = backoff.capped_delay(attempt(n));
            assert!(capped >= previous, "attempt {} went down", n);
            previous = capped;
        }
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let backoff = BackoffScheduler::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
            Duration::from_millis(1000),
        );

        for n in 1..200 {
            let a = attempt(n % 20 + 1);
            let delay = backoff.next_delay(a);
            assert!(delay >= backoff.capped_delay(a));
            assert!(delay < backoff.max_total_delay());
        }
    }
}

//! Reconnection backoff.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_millis(60_000);
/// Failures beyond this no longer double the delay.
pub const DEFAULT_BACKOFF_CAP: u32 = 6;

const JITTER_MIN: f64 = 0.10;
const JITTER_MAX: f64 = 0.20;

/// Exponential backoff with positive jitter.
///
/// `delay(f) = min(initial * 2^min(f, cap) * (1 + U[0.10, 0.20]), max_delay)`
///
/// Jitter is always positive and smaller than the doubling step, so delays
/// grow while the exponent is below the cap. Once it plateaus, use
/// [`BackoffPolicy::next_delay`] to keep a failure streak non-decreasing.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub cap: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_RETRY_DELAY,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, failures: u32) -> Duration {
        let jitter = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        self.delay_with_jitter(failures, jitter)
    }

    /// Delay for the next attempt in a failure streak, never shorter than
    /// the previous delay of the same streak.
    pub fn next_delay(&self, failures: u32, previous: Option<Duration>) -> Duration {
        let delay = self.delay(failures);
        match previous {
            Some(previous) => delay.max(previous).min(self.max_delay),
            None => delay,
        }
    }

    fn delay_with_jitter(&self, failures: u32, jitter: f64) -> Duration {
        let exponent = failures.min(self.cap).min(30) as i32;
        let base = self.initial_delay.as_secs_f64() * 2f64.powi(exponent);
        let delay = base * (1.0 + jitter);
        let max = self.max_delay.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            cap: 5,
        }
    }

    #[test]
    fn test_first_delay_in_jitter_band() {
        let p = policy();
        for _ in 0..100 {
            let d = p.delay(0).as_millis();
            assert!((1100..=1200).contains(&d), "delay was {d}");
        }
    }

    #[test]
    fn test_delay_doubles() {
        let p = policy();
        let ms = |d: Duration| (d.as_secs_f64() * 1000.0).round() as u64;
        assert_eq!(ms(p.delay_with_jitter(1, 0.10)), 2200);
        assert_eq!(ms(p.delay_with_jitter(2, 0.10)), 4400);
        assert_eq!(ms(p.delay_with_jitter(3, 0.20)), 9600);
    }

    #[test]
    fn test_delay_capped_by_max() {
        let p = policy();
        for failures in [5, 6, 10, 1000, u32::MAX] {
            assert!(p.delay(failures) <= Duration::from_millis(60_000));
        }
    }

    #[test]
    fn test_exponent_capped() {
        let p = BackoffPolicy {
            max_delay: Duration::from_secs(3600),
            ..policy()
        };
        assert_eq!(
            p.delay_with_jitter(5, 0.10),
            p.delay_with_jitter(50, 0.10)
        );
    }

    #[test]
    fn test_growth_below_cap_beats_jitter() {
        let p = policy();
        for failures in 0..p.cap {
            // Worst case: highest jitter now, lowest jitter next
            let now = p.delay_with_jitter(failures, JITTER_MAX);
            let next = p.delay_with_jitter(failures + 1, JITTER_MIN);
            assert!(next >= now, "{failures}: {now:?} > {next:?}");
        }
    }

    #[test]
    fn test_streak_is_non_decreasing() {
        let p = BackoffPolicy {
            max_delay: Duration::from_secs(3600),
            ..policy()
        };
        let mut previous = None;
        for failures in 0..40 {
            let delay = p.next_delay(failures, previous);
            if let Some(previous) = previous {
                assert!(delay >= previous);
            }
            assert!(delay <= p.max_delay);
            previous = Some(delay);
        }
    }
}

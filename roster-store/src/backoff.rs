//! Exponential backoff with jitter.
//!
//! Delay for retry `n` (0-based) is `min(max, base * 2^n)`, scaled by a
//! random factor in `[1 - jitter, 1]` so colliding writers spread out.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay that may be randomly shaved off, in `[0, 1]`.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: unit_interval(jitter),
        }
    }

    /// No waiting at all; used by tests and single-writer tools.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Upper bound of the delay before retry `retry`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry `retry`, with `sample` in `[0, 1]` picking the jitter.
    pub fn delay_with(&self, retry: u32, sample: f64) -> Duration {
        let ceiling = self.ceiling(retry);
        let scale = 1.0 - unit_interval(self.jitter) * unit_interval(sample);
        ceiling.mul_f64(scale)
    }

    /// Randomised delay before retry `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        if unit_interval(self.jitter) == 0.0 {
            return self.ceiling(retry);
        }
        let sample = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with(retry, sample)
    }
}

/// Clamp to `[0, 1]`; non-finite values mean no jitter.
fn unit_interval(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2), 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_exponentially_grows_until_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40), 0.0);
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(20));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        assert_eq!(policy.delay(3), Duration::from_millis(40));
        assert_eq!(policy.delay(64), Duration::from_millis(40));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 0.5);
        assert_eq!(policy.delay_with(0, 0.0), Duration::from_millis(100));
        assert_eq!(policy.delay_with(0, 1.0), Duration::from_millis(50));
        for _ in 0..100 {
            let d = policy.delay(2);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400), "{d:?}");
        }
    }

    #[test]
    fn non_finite_jitter_waits_the_full_ceiling() {
        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(1), jitter);
            assert_eq!(policy.jitter, 0.0);
            assert_eq!(policy.delay(1), Duration::from_millis(20));
        }
    }

    #[test]
    fn out_of_range_jitter_set_directly_stays_bounded() {
        for jitter in [2.0, -1.0, f64::NAN] {
            let policy = BackoffPolicy {
                base: Duration::from_millis(100),
                max: Duration::from_secs(1),
                jitter,
            };
            for _ in 0..20 {
                assert!(policy.delay(0) <= Duration::from_millis(100));
            }
            assert!(policy.delay_with(0, 1.0) <= Duration::from_millis(100));
            assert_eq!(policy.delay_with(0, f64::NAN), Duration::from_millis(100));
        }
    }

    #[test]
    fn none_never_waits() {
        assert_eq!(BackoffPolicy::none().delay(5), Duration::ZERO);
    }
}

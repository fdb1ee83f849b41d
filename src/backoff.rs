//! Creation-failure backoff: delay formula and streak tracking

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Ceiling on the failure count fed into the delay formula. Streaks beyond
/// this keep the delay at its maximum instead of growing without bound.
pub const MAX_BACKOFF_COUNT: u32 = 100;

/// Delay policy applied between creation retries.
///
/// The delay for the `n`-th consecutive failure is
/// `floor(base_unit * min(n, 100) ^ multiplier)`, so with the defaults the
/// first failures back off 100 ms, 400 ms, 900 ms, ...
///
/// # Examples
///
/// ```
/// use repool::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::default();
/// assert_eq!(policy.delay(1), Duration::from_millis(100));
/// assert_eq!(policy.delay(2), Duration::from_millis(400));
/// assert_eq!(policy.delay(3), Duration::from_millis(900));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Base delay unit multiplied by the scaled failure count.
    pub base_unit: Duration,
    /// Exponent applied to the failure count.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_unit: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Compute the delay for the given consecutive-failure count.
    pub fn delay(&self, failures: u32) -> Duration {
        let effective = failures.min(MAX_BACKOFF_COUNT);
        let millis = (self.base_unit.as_millis() as f64 * f64::from(effective).powf(self.multiplier))
            .floor();
        Duration::from_millis(millis as u64)
    }
}

/// Consecutive creation-failure counter shared across acquiring callers.
///
/// `record_failure` returns the streak value already capped for the formula;
/// the next successful creation resets the streak to zero.
#[derive(Debug, Default)]
pub(crate) struct FailureStreak(AtomicU32);

impl FailureStreak {
    pub(crate) fn record_failure(&self) -> u32 {
        let streak = self.0.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        streak.min(MAX_BACKOFF_COUNT)
    }

    pub(crate) fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_matches_documented_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(900));
        assert_eq!(policy.delay(10), Duration::from_millis(10_000));
    }

    #[test]
    fn delay_is_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut last = Duration::ZERO;
        for n in 1..=150 {
            let delay = policy.delay(n);
            assert!(delay >= last, "delay regressed at failure {n}");
            last = delay;
        }
    }

    #[test]
    fn effective_count_caps_at_ceiling() {
        let policy = BackoffPolicy::default();
        let ceiling = policy.delay(MAX_BACKOFF_COUNT);
        assert_eq!(policy.delay(MAX_BACKOFF_COUNT + 1), ceiling);
        assert_eq!(policy.delay(u32::MAX), ceiling);
    }

    #[test]
    fn streak_counts_and_resets() {
        let streak = FailureStreak::default();
        assert_eq!(streak.record_failure(), 1);
        assert_eq!(streak.record_failure(), 2);
        streak.reset();
        assert_eq!(streak.record_failure(), 1);
    }

    #[test]
    fn streak_report_caps_at_ceiling() {
        let streak = FailureStreak::default();
        let mut last = 0;
        for _ in 0..MAX_BACKOFF_COUNT + 10 {
            last = streak.record_failure();
        }
        assert_eq!(last, MAX_BACKOFF_COUNT);
    }
}

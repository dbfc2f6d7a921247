//! Exponential backoff shared by channel reconnects and request retries
//!
//! The policy is a pure function of the attempt number. It does not cap the
//! delay; callers bound growth through their own maximum attempt count.

use std::time::Duration;

/// Deterministic exponential backoff: `base * 2^attempt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn from_millis(base_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms))
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before retry number `attempt` (1 for the first retry).
    ///
    /// Attempt 0 means "nothing has failed yet" and yields no delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let multiplier = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier))
    }

    /// Delays for attempts `1..=max_attempts`, in order
    pub fn schedule(&self, max_attempts: u32) -> Vec<Duration> {
        (1..=max_attempts).map(|attempt| self.delay(attempt)).collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_millis(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempt_has_no_delay() {
        assert_eq!(BackoffPolicy::from_millis(250).delay(0), Duration::ZERO);
    }

    #[test]
    fn doubles_per_attempt() {
        let policy = BackoffPolicy::from_millis(1000);
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(2), Duration::from_millis(4000));
        assert_eq!(policy.delay(5), Duration::from_millis(32_000));
    }

    #[test]
    fn schedule_is_strictly_increasing() {
        let delays = BackoffPolicy::from_millis(100).schedule(5);
        assert_eq!(delays.len(), 5);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(delays[0], Duration::from_millis(200));
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let policy = BackoffPolicy::from_millis(1000);
        assert_eq!(policy.delay(64), Duration::from_millis(u64::MAX));
        assert_eq!(policy.delay(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn default_base_is_one_second() {
        assert_eq!(BackoffPolicy::default().base(), Duration::from_secs(1));
    }
}

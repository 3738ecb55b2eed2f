use std::time::Duration;

/// Exponential backoff for the reconnect path
///
/// Pure: callers count failures and sleep; the policy only decides how long,
/// or whether to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Consecutive failed connections tolerated, the first one included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures,
    /// or `None` once the budget is spent.
    pub fn delay_after(&self, failures: u32) -> Option<Duration> {
        if failures == 0 {
            return Some(Duration::ZERO);
        }
        if failures >= self.max_attempts {
            return None;
        }

        let exponent = (failures - 1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.base_delay > self.max_delay {
            return Err(format!(
                "base delay {}ms exceeds cap {}ms",
                self.base_delay.as_millis(),
                self.max_delay.as_millis()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 10);

        let delays: Vec<u64> = (1..=6)
            .filter_map(|n| policy.delay_after(n))
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_gives_up_at_max_attempts() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 3);

        assert!(policy.delay_after(1).is_some());
        assert!(policy.delay_after(2).is_some());
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(policy.delay_after(4), None);
    }

    #[test]
    fn test_large_failure_counts_do_not_overflow() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), u32::MAX);
        assert_eq!(policy.delay_after(200), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(1), 0)
            .validate()
            .is_err());
        assert!(RetryPolicy::new(Duration::from_secs(20), Duration::from_secs(10), 3)
            .validate()
            .is_err());
    }
}

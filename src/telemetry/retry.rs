//! Bounded retry schedule for telemetry delivery

use std::time::Duration;

/// Retry schedule: `attempts` tries, sleeping `base_delay * min(2^i, max_multiplier)`
/// after failed attempt `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Backoff unit
    pub base_delay: Duration,
    /// Ceiling on the exponential multiplier
    pub max_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_budget(3)
    }
}

impl RetryPolicy {
    /// Policy allowing `retry_budget` retries after the first attempt
    pub fn from_budget(retry_budget: u32) -> Self {
        Self {
            attempts: retry_budget.saturating_add(1),
            base_delay: Duration::from_millis(100),
            max_multiplier: 8,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after failed attempt `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32
            .checked_pow(attempt)
            .unwrap_or(u32::MAX)
            .min(self.max_multiplier);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Whether another attempt follows attempt `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.attempts
    }

    /// Sum of all sleeps if every attempt fails
    pub fn worst_case_backoff(&self) -> Duration {
        (0..self.attempts.saturating_sub(1))
            .map(|i| self.delay_for_attempt(i))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = RetryPolicy::from_budget(6);
        let delays: Vec<u128> = (0..6)
            .map(|i| policy.delay_for_attempt(i).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800, 800]);
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(800));
    }

    #[test]
    fn test_attempts_from_budget() {
        let policy = RetryPolicy::from_budget(2);
        assert_eq!(policy.attempts, 3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        let none = RetryPolicy::from_budget(0);
        assert_eq!(none.attempts, 1);
        assert!(!none.should_retry(0));
        assert_eq!(none.worst_case_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_worst_case_backoff() {
        let policy = RetryPolicy::from_budget(3).with_base_delay(Duration::from_millis(10));
        assert_eq!(policy.worst_case_backoff(), Duration::from_millis(70));
    }
}

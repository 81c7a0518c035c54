//! Retry policy consumed by whatever drives stage execution
//!
//! Stages never loop or sleep on their own; the policy only describes how
//! many extra attempts a scheduler may make and how long it waits between them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry count and delay for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,

    /// Wait between attempts
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    /// Policy with no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts, first one included
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retries() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.allows_retry_after(1));
    }

    #[test]
    fn three_retries() {
        let policy = RetryPolicy::new(3, Duration::from_secs(300));
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(3));
        assert!(!policy.allows_retry_after(4));
    }

    #[test]
    fn saturating_attempts() {
        let policy = RetryPolicy::new(u32::MAX, Duration::ZERO);
        assert_eq!(policy.max_attempts(), u32::MAX);
    }
}

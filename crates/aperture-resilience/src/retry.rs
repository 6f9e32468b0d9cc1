use std::time::Duration;

/// Per-service retry budget. The initial attempt is free; the wait before
/// retry `k` (1-indexed) doubles the backoff each time. The whole call,
/// waits included, must finish inside `timeout`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_before(1), Duration::from_millis(200));
        assert_eq!(policy.delay_before(2), Duration::from_millis(400));
        assert_eq!(policy.delay_before(3), Duration::from_millis(800));
    }

    #[test]
    fn large_retry_counts_saturate() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_before(64);
        assert!(delay >= policy.delay_before(10));
    }
}

use std::time::Duration;

use rand::Rng;

/// Backoff parameters for the retry policy.
///
/// Which errors qualify for retry is decided by
/// [`crate::ClientError::is_retryable`]; this type only shapes the delays.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Hard cap on any single delay.
    pub max_delay_ms: u64,
    /// Apply up to ±50% uniform jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based): exponential growth
    /// capped at `max_delay_ms`, with jitter when enabled.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exp = attempt.min(16) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay_ms as f64);
        let delayed = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_millis(delayed.min(self.max_delay_ms as f64) as u64)
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff schedule for transient embedding failures.
///
/// The defaults produce delays of 100 ms, 400 ms, 1.6 s — three retries
/// after the initial attempt, then the failure is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            multiplier: 4.0,
            max_delay_ms: 1_600,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_millis(exp.min(self.max_delay_ms as f64) as u64)
    }
}

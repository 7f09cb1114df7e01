//! Reconnect backoff policy

use std::time::Duration;

use crate::config::RealtimeConfig;

/// Exponential backoff with a capped number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first automatic retry
    pub base_delay: Duration,
    /// Automatic retries scheduled before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_delay_ms),
            config.max_reconnect_attempts,
        )
    }

    /// `base_delay × 2^attempt` (0-indexed), saturating
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether `attempts` retries already scheduled leave none to spend
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

//! Reconnect policy for the realtime channel.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_auto_reconnect() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_max_attempts() -> Option<u32> {
    Some(6)
}

/// Controls how the realtime channel retries failed connections.
///
/// Delays grow exponentially: `base_delay_ms * 2^attempt`, capped at
/// `max_delay_ms`. The attempt counter resets only on a successful
/// connection; once `max_attempts` is exhausted the channel parks in
/// the failed state with no timer armed, until an explicit reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// `None` means retry forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_delay_ms = delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Backoff delay before the given attempt (0-based count of
    /// failures so far).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

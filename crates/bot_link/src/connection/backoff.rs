//! Reconnect backoff.

use std::time::Duration;

/// Delay policy between connection attempts.
///
/// Connection failures double the delay from `base` up to `max`. Errors that
/// are not connection failures wait `error_pause` without touching the
/// attempt counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub error_pause: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            error_pause: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempts, max)`
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Consecutive failed attempts since the last HELLO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    attempts: u32,
}

impl ReconnectState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a connection failure and returns the new attempt count.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Called when a HELLO arrives.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn next_delay(&self, policy: &ReconnectPolicy) -> Duration {
        policy.delay_for(self.attempts)
    }
}

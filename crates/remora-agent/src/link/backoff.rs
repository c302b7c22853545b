//! Reconnect pacing

use std::time::Duration;

use super::{MAX_RECONNECT_DELAY, MIN_RECONNECT_DELAY};

/// Doubling backoff for redial attempts, reset after a successful connect
#[derive(Debug)]
pub struct ReconnectBackoff {
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self {
            current: MIN_RECONNECT_DELAY,
        }
    }

    /// Delay to sleep before the next attempt. Doubles on each call,
    /// capped at the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_RECONNECT_DELAY);
        delay
    }

    /// Back to the minimum after a connection is established
    pub fn reset(&mut self) {
        self.current = MIN_RECONNECT_DELAY;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut backoff = ReconnectBackoff::new();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_backoff_stays_at_ceiling() {
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn test_reset_returns_to_minimum() {
        let mut backoff = ReconnectBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), MIN_RECONNECT_DELAY);
    }
}

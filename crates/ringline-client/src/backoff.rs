//! Reconnect backoff policy.

use std::time::Duration;

/// Base delay before the first retry.
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Delay ceiling.
const MAX_DELAY: Duration = Duration::from_secs(30);
/// Retries before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff: 1s, 2s, 4s, ... capped at 30s, at most five
/// attempts per reconnect episode.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Start a fresh episode.
    #[must_use]
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the attempt budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= MAX_ATTEMPTS {
            return None;
        }
        let delay = BASE_DELAY
            .checked_mul(1 << self.attempt)
            .map_or(MAX_DELAY, |d| d.min(MAX_DELAY));
        self.attempt += 1;
        Some(delay)
    }

    /// Attempts consumed so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_one_second() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(8)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(16)));
    }

    #[test]
    fn exhausts_after_five_attempts() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            assert!(backoff.next_delay().is_some());
        }
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = Backoff { attempt: 4 };
        // 2^4 = 16s, still under the cap.
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(16)));
        let mut high = Backoff { attempt: 0 };
        for _ in 0..5 {
            let delay = high.next_delay().unwrap();
            assert!(delay <= MAX_DELAY);
        }
    }
}

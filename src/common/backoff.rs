//! Linear backoff schedules
//!
//! Used for stream reconnection (`min(base * attempt, max)`) and for the scan
//! loop's failure wait (`min(offset + step * failures, cap)`).

use std::time::Duration;

/// `delay(n) = min(offset + step * n, cap)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub offset: Duration,
    pub step: Duration,
    pub cap: Duration,
}

impl LinearBackoff {
    pub fn new(offset: Duration, step: Duration, cap: Duration) -> Self {
        Self { offset, step, cap }
    }

    pub fn delay(&self, n: u32) -> Duration {
        self.offset
            .saturating_add(self.step.saturating_mul(n))
            .min(self.cap)
    }
}

/// Reconnection policy for the streaming client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    backoff: LinearBackoff,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: LinearBackoff::new(Duration::ZERO, base_delay, max_delay),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt.max(1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60), 10)
    }
}

/// Consecutive-attempt tracker driven by a [`ReconnectPolicy`]
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection was established; the next failure starts from the base delay
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// Schedule the next attempt. `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays_non_decreasing_until_cap() {
        let policy = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(60), 20);
        let delays: Vec<Duration> = (1..=20).map(|a| policy.delay_for(a)).collect();

        assert_eq!(delays[0], Duration::from_secs(5));
        assert_eq!(delays[1], Duration::from_secs(10));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));
        assert_eq!(delays[19], Duration::from_secs(60));
    }

    #[test]
    fn test_reset_after_connect() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.next_delay();
        state.next_delay();
        assert_eq!(state.next_delay(), Some(Duration::from_secs(15)));

        state.on_connected();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 3);
        let mut state = ReconnectState::new(policy);
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.is_exhausted());
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_scan_failure_backoff() {
        let backoff = LinearBackoff::new(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Duration::from_secs(300),
        );
        assert_eq!(backoff.delay(1), Duration::from_secs(90));
        assert_eq!(backoff.delay(4), Duration::from_secs(180));
        assert_eq!(backoff.delay(50), Duration::from_secs(300));
    }
}

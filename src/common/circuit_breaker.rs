//! Circuit breaker for exchange requests
//!
//! Trips after a run of transient failures (network, rate limit, server
//! unavailable) and rejects requests until a cool-down has passed. Rejected
//! and permanent errors such as bad parameters do not count against the
//! breaker.
//!
//! States:
//! - Closed: requests pass through
//! - Open: requests fail fast with [`ExchangeError::CircuitOpen`]
//! - HalfOpen: trial requests allowed; enough successes close the circuit

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit
    pub failure_threshold: u32,
    /// Successful trial requests needed to close it again
    pub success_threshold: u32,
    /// Time spent open before probing
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cool_down: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Gate a request. Moves Open to HalfOpen once the cool-down has elapsed.
    pub fn check(&mut self) -> Result<(), ExchangeError> {
        if self.state == CircuitState::Open {
            let cooled = self
                .opened_at
                .map(|t| t.elapsed() >= self.config.cool_down)
                .unwrap_or(true);
            if !cooled {
                return Err(ExchangeError::CircuitOpen);
            }
            info!("Exchange circuit half-open, probing");
            self.state = CircuitState::HalfOpen;
            self.trial_successes = 0;
        }
        Ok(())
    }

    /// Feed a request outcome into the breaker
    pub fn record<T>(&mut self, outcome: &Result<T, ExchangeError>) {
        match outcome {
            Ok(_) => self.on_success(),
            Err(e) if e.is_transient() => self.on_failure(),
            Err(_) => {}
        }
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.trial_successes += 1;
            if self.trial_successes >= self.config.success_threshold {
                info!("Exchange circuit closed, connectivity restored");
                self.state = CircuitState::Closed;
                self.opened_at = None;
            }
        }
    }

    fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            warn!(
                "Exchange circuit opened after {} consecutive failures",
                self.consecutive_failures
            );
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
            self.trial_successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_err() -> Result<(), ExchangeError> {
        Err(ExchangeError::Network("connection reset".into()))
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..2 {
            cb.record(&network_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record(&network_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(), Err(ExchangeError::CircuitOpen)));
    }

    #[test]
    fn test_permanent_errors_do_not_trip() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(1));
        cb.record::<()>(&Err(ExchangeError::Api {
            status: 400,
            body: "LOT_SIZE".into(),
        }));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_failure_run() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(2));
        cb.record(&network_err());
        cb.record(&Ok::<(), ExchangeError>(()));
        cb.record(&network_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cool_down(Duration::from_secs(10));
        let mut cb = CircuitBreaker::new(config);
        cb.record(&network_err());
        assert!(cb.check().is_err());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record(&Ok::<(), ExchangeError>(()));
        cb.record(&Ok::<(), ExchangeError>(()));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cool_down(Duration::from_secs(5));
        let mut cb = CircuitBreaker::new(config);
        cb.record(&network_err());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cb.check().is_ok());
        cb.record(&network_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}

//! Circuit breaker guarding the rate limiter.
//!
//! The breaker counts consecutive internal failures of the limiter (lock
//! timeouts, panics inside a policy). Once the threshold is reached it opens
//! and the limiter fails closed: every request is refused as unavailable
//! until the recovery timeout has passed and a probe request succeeds.

use crate::application::ports::Clock;
use crate::infrastructure::clock::SystemClock;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Operating normally
    Closed = 0,
    /// Too many failures; requests are refused
    Open = 1,
    /// Recovery timeout elapsed; probe requests decide the next state
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// When the breaker opens and how long it stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive limiter failures that open the breaker
    pub failure_threshold: u32,
    /// How long an open breaker refuses requests before probing
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker for the admission path.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    /// Reference point for `last_failure_nanos`
    epoch: Instant,
}

impl CircuitBreaker {
    /// Breaker with the default threshold (5) and recovery timeout (30s).
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Breaker on the system clock.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a circuit breaker that reads time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_nanos: AtomicU64::new(0),
            config,
            clock,
            epoch,
        }
    }

    /// Current position.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// The breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether an operation may run.
    ///
    /// Returns `false` while the circuit is open; the caller must then refuse
    /// the request instead of serving it unguarded.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.remaining_open().is_some() {
                    return false;
                }
                // only one caller moves Open -> HalfOpen
                let moved = self.state.compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if moved.is_ok() {
                    tracing::info!("circuit breaker half-open; probing limiter");
                }
                moved.is_ok() || self.state() != CircuitState::Open
            }
        }
    }

    /// Time left before an open circuit lets a probe through.
    ///
    /// `None` unless the circuit is open and still inside its recovery
    /// timeout.
    pub fn remaining_open(&self) -> Option<Duration> {
        if self.state() != CircuitState::Open {
            return None;
        }
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(self.last_failure_time());
        self.config
            .recovery_timeout
            .checked_sub(elapsed)
            .filter(|left| !left.is_zero())
    }

    /// Record an admission decision that completed.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.consecutive_failures.store(0, Ordering::Release);
                if self
                    .state
                    .compare_exchange(
                        CircuitState::HalfOpen as u8,
                        CircuitState::Closed as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    tracing::info!("circuit breaker closed; limiter recovered");
                }
            }
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a limiter failure.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        let nanos = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.last_failure_nanos.store(nanos, Ordering::Release);

        match self.state() {
            CircuitState::HalfOpen => {
                self.state.store(CircuitState::Open as u8, Ordering::Release);
                tracing::warn!(failures, "limiter probe failed; circuit breaker reopened");
            }
            CircuitState::Closed if failures >= u64::from(self.config.failure_threshold) => {
                self.state.store(CircuitState::Open as u8, Ordering::Release);
                tracing::warn!(
                    failures,
                    recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                    "circuit breaker opened; limiter refusing requests"
                );
            }
            _ => {}
        }
    }

    fn last_failure_time(&self) -> Instant {
        let nanos = self.last_failure_nanos.load(Ordering::Acquire);
        self.epoch + Duration::from_nanos(nanos)
    }

    /// Failures since the last completed decision.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Close the breaker and forget the failure streak.
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

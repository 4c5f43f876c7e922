//! Rate limiter coordination logic.
//!
//! The limiter decides whether a request may proceed based on the rate window
//! of its `(caller, endpoint class)` pair. Rejections are ordinary outcomes;
//! errors only describe a limiter that cannot decide.
//!
//! # Fail-closed behavior
//!
//! A lock timeout or a panic inside a policy counts as a limiter failure.
//! Repeated failures open the circuit breaker, and while it is open every
//! request is refused with [`LimiterError::RateLimiterUnavailable`]. The
//! limiter never lets traffic through unchecked.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::ports::{Storage, StoreError};
use crate::application::registry::WindowRegistry;
use crate::domain::caller::{CallerId, EndpointClass, RateKey};
use crate::domain::policy::{Admission, Policy, RateLimitPolicy};
use std::panic;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Retry hint for a failure that did not open the breaker.
const FAILURE_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Errors returned when the limiter cannot make a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// The limiter is failing; retry after the hint
    #[error("rate limiter unavailable, retry after {retry_after:?}")]
    RateLimiterUnavailable {
        /// How long to wait before retrying
        retry_after: Duration,
    },
}

impl LimiterError {
    /// How long the caller should wait before retrying.
    pub fn retry_after(&self) -> Duration {
        match *self {
            LimiterError::RateLimiterUnavailable { retry_after } => retry_after,
        }
    }
}

/// Coordinates admission decisions.
#[derive(Clone)]
pub struct RateLimiter<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    registry: WindowRegistry<S>,
    metrics: Metrics,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl<S> RateLimiter<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `registry` - The window registry (which contains the clock)
    /// * `metrics` - Metrics tracker
    /// * `circuit_breaker` - Circuit breaker guarding the admission path
    pub fn new(
        registry: WindowRegistry<S>,
        metrics: Metrics,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            registry,
            metrics,
            circuit_breaker,
        }
    }

    /// Decide whether `caller` may call `endpoint` at `now`.
    ///
    /// Concurrent calls for the same pair are serialized, so the ceiling is
    /// exact. Pairs never share state.
    ///
    /// # Errors
    /// `RateLimiterUnavailable` when the circuit breaker is open or the
    /// window could not be evaluated.
    pub fn admit(
        &self,
        caller: &CallerId,
        endpoint: &EndpointClass,
        now: Instant,
    ) -> Result<Admission, LimiterError> {
        if !self.circuit_breaker.allow_request() {
            let retry_after = self
                .circuit_breaker
                .remaining_open()
                .unwrap_or(FAILURE_RETRY_AFTER);
            tracing::debug!(
                caller = %caller,
                endpoint = %endpoint,
                retry_after_ms = retry_after.as_millis() as u64,
                "circuit open; request refused"
            );
            return Err(LimiterError::RateLimiterUnavailable { retry_after });
        }

        let key = RateKey::new(caller.clone(), endpoint.clone());
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.registry
                .with_window(key, |policy| policy.register_request(now))
        }));

        let admission = match result {
            Ok(Ok(admission)) => {
                self.circuit_breaker.record_success();
                admission
            }
            Ok(Err(error)) => return Err(self.fail(caller, endpoint, Some(error))),
            Err(_) => return Err(self.fail(caller, endpoint, None)),
        };

        match admission {
            Admission::Admitted => {
                self.metrics.record_admitted();
                tracing::debug!(caller = %caller, endpoint = %endpoint, "request admitted");
            }
            Admission::Rejected { retry_after } => {
                self.metrics.record_rejected();
                tracing::debug!(
                    caller = %caller,
                    endpoint = %endpoint,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "request rejected"
                );
            }
        }

        Ok(admission)
    }

    /// [`admit`](Self::admit) at the registry clock's current time.
    pub fn admit_now(
        &self,
        caller: &CallerId,
        endpoint: &EndpointClass,
    ) -> Result<Admission, LimiterError> {
        let now = self.registry.clock().now();
        self.admit(caller, endpoint, now)
    }

    fn fail(
        &self,
        caller: &CallerId,
        endpoint: &EndpointClass,
        error: Option<StoreError>,
    ) -> LimiterError {
        self.circuit_breaker.record_failure();
        self.metrics.record_limiter_failure();

        match &error {
            Some(error) => tracing::warn!(
                caller = %caller,
                endpoint = %endpoint,
                error = %error,
                "rate window unavailable"
            ),
            None => tracing::warn!(
                caller = %caller,
                endpoint = %endpoint,
                "rate policy panicked"
            ),
        }

        let retry_after = self
            .circuit_breaker
            .remaining_open()
            .unwrap_or(FAILURE_RETRY_AFTER);
        LimiterError::RateLimiterUnavailable { retry_after }
    }

    /// Get a reference to the registry.
    pub fn registry(&self) -> &WindowRegistry<S> {
        &self.registry
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the circuit breaker.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }
}

impl<S> std::fmt::Debug for RateLimiter<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("registry", &self.registry)
            .field("circuit_state", &self.circuit_breaker.state())
            .finish()
    }
}

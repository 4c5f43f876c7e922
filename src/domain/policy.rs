//! Admission policies for per-caller rate limiting.
//!
//! A policy holds the state of one rate window and decides, request by
//! request, whether to admit. Rejections always carry a non-zero hint for
//! when the next request could be admitted.
//!
//! All policies share two guarantees:
//! - a caller whose requests arrive strictly slower than the policy's rate is
//!   never rejected;
//! - a burst beyond the ceiling inside one window is rejected from the
//!   (N+1)-th request on.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Smallest retry hint ever reported.
const MIN_RETRY_AFTER: Duration = Duration::from_millis(1);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed
    Admitted,
    /// The request is over budget
    Rejected {
        /// How long the caller should wait before trying again
        retry_after: Duration,
    },
}

impl Admission {
    /// Check if the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Check if the request was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected { .. })
    }

    /// The retry hint of a rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Admission::Admitted => None,
            Admission::Rejected { retry_after } => Some(*retry_after),
        }
    }

    fn rejected(retry_after: Duration) -> Self {
        Admission::Rejected {
            retry_after: retry_after.max(MIN_RETRY_AFTER),
        }
    }
}

/// Error returned when a policy is constructed with unusable parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Token bucket capacity must be at least one token
    #[error("capacity must be at least 1, got {0}")]
    InvalidCapacity(f64),
    /// Refill rate must be finite and greater than zero
    #[error("refill rate must be positive and finite, got {0}")]
    InvalidRefillRate(f64),
    /// Window policies need room for at least one request
    #[error("max_requests must be greater than 0")]
    ZeroMaxRequests,
    /// Window duration must be greater than zero
    #[error("window duration must be greater than 0")]
    ZeroWindow,
}

/// Trait for implementing admission policies.
pub trait RateLimitPolicy: Send + Sync {
    /// Register a request arriving at `now` and decide whether to admit it.
    fn register_request(&mut self, now: Instant) -> Admission;

    /// Whether the window holds no state that would affect the next request.
    ///
    /// Idle windows can be dropped without changing any future decision.
    fn is_idle(&self, now: Instant) -> bool;

    /// Reset the policy state.
    fn reset(&mut self);
}

/// Token bucket policy.
///
/// The bucket starts full with `capacity` tokens and refills continuously at
/// `refill_per_sec`. Every admitted request takes one token.
///
/// # Example
/// ```
/// use docnum_guard::{RateLimitPolicy, TokenBucketPolicy};
/// use std::time::{Duration, Instant};
///
/// let mut policy = TokenBucketPolicy::new(2.0, 1.0).unwrap();
/// let now = Instant::now();
///
/// assert!(policy.register_request(now).is_admitted());
/// assert!(policy.register_request(now).is_admitted());
///
/// let third = policy.register_request(now);
/// assert_eq!(third.retry_after(), Some(Duration::from_secs(1)));
///
/// assert!(policy.register_request(now + Duration::from_secs(1)).is_admitted());
/// ```
#[derive(Debug, Clone)]
pub struct TokenBucketPolicy {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Option<Instant>,
}

impl TokenBucketPolicy {
    /// Create a token bucket.
    ///
    /// # Errors
    /// Returns `PolicyError` if `capacity < 1` or the refill rate is not a
    /// positive finite number.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Result<Self, PolicyError> {
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(PolicyError::InvalidCapacity(capacity));
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(PolicyError::InvalidRefillRate(refill_per_sec));
        }
        Ok(Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: None,
        })
    }

    /// Tokens available at `now`, without consuming any.
    pub fn available(&self, now: Instant) -> f64 {
        match self.last_refill {
            None => self.capacity,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                (self.tokens + elapsed * self.refill_per_sec).min(self.capacity)
            }
        }
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.available(now);
        self.last_refill = Some(match self.last_refill {
            Some(last) if last > now => last,
            _ => now,
        });
    }
}

impl RateLimitPolicy for TokenBucketPolicy {
    fn register_request(&mut self, now: Instant) -> Admission {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Admission::Admitted
        } else {
            // tiny refill rates can push the wait past what a Duration holds
            let deficit = 1.0 - self.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.refill_per_sec)
                .unwrap_or(Duration::MAX);
            Admission::rejected(wait)
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.available(now) >= self.capacity
    }

    fn reset(&mut self) {
        self.tokens = self.capacity;
        self.last_refill = None;
    }
}

/// Sliding window policy.
///
/// Admits up to `max_requests` within any span of `window`. Admitted request
/// timestamps are kept and expire once they are `window` old.
///
/// # Example
/// ```
/// use docnum_guard::{RateLimitPolicy, SlidingWindowPolicy};
/// use std::time::{Duration, Instant};
///
/// let mut policy = SlidingWindowPolicy::new(2, Duration::from_secs(60)).unwrap();
/// let now = Instant::now();
///
/// assert!(policy.register_request(now).is_admitted());
/// assert!(policy.register_request(now).is_admitted());
/// assert!(policy.register_request(now).is_rejected());
///
/// assert!(policy.register_request(now + Duration::from_secs(60)).is_admitted());
/// ```
#[derive(Debug, Clone)]
pub struct SlidingWindowPolicy {
    max_requests: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindowPolicy {
    /// Create a sliding window policy.
    ///
    /// # Errors
    /// Returns `PolicyError` if `max_requests` or `window` is zero.
    pub fn new(max_requests: usize, window: Duration) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self {
            max_requests,
            window,
            admitted: VecDeque::with_capacity(max_requests.min(1024)),
        })
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimitPolicy for SlidingWindowPolicy {
    fn register_request(&mut self, now: Instant) -> Admission {
        self.expire(now);

        if self.admitted.len() < self.max_requests {
            self.admitted.push_back(now);
            return Admission::Admitted;
        }

        // full window: the slot frees up when the oldest entry expires
        let oldest = self.admitted.front().copied().unwrap_or(now);
        Admission::rejected(
            self.window
                .saturating_sub(now.saturating_duration_since(oldest)),
        )
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.admitted
            .back()
            .map_or(true, |&newest| now.saturating_duration_since(newest) >= self.window)
    }

    fn reset(&mut self) {
        self.admitted.clear();
    }
}

/// Fixed window policy.
///
/// Counts requests in consecutive windows of `window`, the first one opening
/// with the first request. The count resets when a window rolls over.
#[derive(Debug, Clone)]
pub struct FixedWindowPolicy {
    max_requests: usize,
    window: Duration,
    window_start: Option<Instant>,
    count: usize,
}

impl FixedWindowPolicy {
    /// Create a fixed window policy.
    ///
    /// # Errors
    /// Returns `PolicyError` if `max_requests` or `window` is zero.
    pub fn new(max_requests: usize, window: Duration) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self {
            max_requests,
            window,
            window_start: None,
            count: 0,
        })
    }
}

impl RateLimitPolicy for FixedWindowPolicy {
    fn register_request(&mut self, now: Instant) -> Admission {
        let start = match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => start,
            _ => {
                self.window_start = Some(now);
                self.count = 0;
                now
            }
        };

        if self.count < self.max_requests {
            self.count += 1;
            Admission::Admitted
        } else {
            Admission::rejected(
                self.window
                    .saturating_sub(now.saturating_duration_since(start)),
            )
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.window_start
            .map_or(true, |start| now.saturating_duration_since(start) >= self.window)
    }

    fn reset(&mut self) {
        self.window_start = None;
        self.count = 0;
    }
}

/// Convenience enum over the built-in policies.
#[derive(Debug, Clone)]
pub enum Policy {
    /// Token bucket policy
    TokenBucket(TokenBucketPolicy),
    /// Sliding window policy
    SlidingWindow(SlidingWindowPolicy),
    /// Fixed window policy
    FixedWindow(FixedWindowPolicy),
}

impl Policy {
    /// Create a token bucket policy.
    pub fn token_bucket(capacity: f64, refill_per_sec: f64) -> Result<Self, PolicyError> {
        TokenBucketPolicy::new(capacity, refill_per_sec).map(Policy::TokenBucket)
    }

    /// Create a sliding window policy.
    pub fn sliding_window(max_requests: usize, window: Duration) -> Result<Self, PolicyError> {
        SlidingWindowPolicy::new(max_requests, window).map(Policy::SlidingWindow)
    }

    /// Create a fixed window policy.
    pub fn fixed_window(max_requests: usize, window: Duration) -> Result<Self, PolicyError> {
        FixedWindowPolicy::new(max_requests, window).map(Policy::FixedWindow)
    }
}

impl Default for Policy {
    /// 100 requests per rolling minute.
    fn default() -> Self {
        Policy::SlidingWindow(SlidingWindowPolicy {
            max_requests: 100,
            window: Duration::from_secs(60),
            admitted: VecDeque::new(),
        })
    }
}

impl RateLimitPolicy for Policy {
    fn register_request(&mut self, now: Instant) -> Admission {
        match self {
            Policy::TokenBucket(p) => p.register_request(now),
            Policy::SlidingWindow(p) => p.register_request(now),
            Policy::FixedWindow(p) => p.register_request(now),
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        match self {
            Policy::TokenBucket(p) => p.is_idle(now),
            Policy::SlidingWindow(p) => p.is_idle(now),
            Policy::FixedWindow(p) => p.is_idle(now),
        }
    }

    fn reset(&mut self) {
        match self {
            Policy::TokenBucket(p) => p.reset(),
            Policy::SlidingWindow(p) => p.reset(),
            Policy::FixedWindow(p) => p.reset(),
        }
    }
}

/// Declarative form of a [`Policy`], as found in configuration files.
///
/// ```
/// use docnum_guard::PolicySpec;
///
/// let spec: PolicySpec = serde_json::from_str(
///     r#"{ "kind": "token_bucket", "capacity": 20, "refill_per_sec": 0.5 }"#,
/// ).unwrap();
/// assert!(spec.build().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    /// See [`TokenBucketPolicy`]
    TokenBucket {
        /// Burst size
        capacity: f64,
        /// Tokens added per second
        refill_per_sec: f64,
    },
    /// See [`SlidingWindowPolicy`]
    SlidingWindow {
        /// Ceiling per window
        max_requests: usize,
        /// Window length in seconds
        window_secs: u64,
    },
    /// See [`FixedWindowPolicy`]
    FixedWindow {
        /// Ceiling per window
        max_requests: usize,
        /// Window length in seconds
        window_secs: u64,
    },
}

impl PolicySpec {
    /// Turn the specification into a validated policy.
    pub fn build(&self) -> Result<Policy, PolicyError> {
        match *self {
            PolicySpec::TokenBucket {
                capacity,
                refill_per_sec,
            } => Policy::token_bucket(capacity, refill_per_sec),
            PolicySpec::SlidingWindow {
                max_requests,
                window_secs,
            } => Policy::sliding_window(max_requests, Duration::from_secs(window_secs)),
            PolicySpec::FixedWindow {
                max_requests,
                window_secs,
            } => Policy::fixed_window(max_requests, Duration::from_secs(window_secs)),
        }
    }
}

impl Default for PolicySpec {
    fn default() -> Self {
        PolicySpec::SlidingWindow {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

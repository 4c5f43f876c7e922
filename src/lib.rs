//! # docnum-guard
//!
//! Document number allocation and integrity for back-office services.
//!
//! The crate issues per-scope document numbers that never repeat, keeps a
//! tamper-evident archive entry for every deleted numbered document, and puts
//! per-caller admission control in front of the request paths that reach
//! them.
//!
//! ## Quick Start
//!
//! ```rust
//! use docnum_guard::{CallerId, DocumentGuard, EndpointClass, GenerateRequest, StatusHint};
//!
//! let guard = DocumentGuard::builder()
//!     .with_allocation_enabled(true)
//!     .build()
//!     .unwrap();
//! let caller = CallerId::new("clerk-7");
//!
//! // Any listing or mutation route: admission control only
//! guard.guard(&caller, &EndpointClass::new("list")).unwrap();
//!
//! // Number generation: admission, validation, allocation
//! let issued = guard
//!     .generate(&caller, &GenerateRequest::new("DOC", "/2025", "2025"))
//!     .unwrap();
//! assert_eq!(issued.rendered, "DOC-0001/2025");
//!
//! // Deletion: archive after the live record is gone
//! guard
//!     .archive_deleted(issued.scope.key(), issued.number, Some("duplicate"), Some(b"..."))
//!     .unwrap();
//!
//! // Failures carry the status a gateway should answer with
//! let err = guard
//!     .generate(&caller, &GenerateRequest::new("DOC ", "", ""))
//!     .unwrap_err();
//! assert_eq!(err.status_hint(), StatusHint::BadRequest);
//! ```
//!
//! ## Components
//!
//! - **Pattern validation** ([`domain::pattern`]): prefixes are non-empty runs
//!   of ASCII letters, digits, Thai letters, `_` and `-`; suffixes may also
//!   contain `/` and may be empty.
//! - **Sequence allocation** ([`SequenceAllocator`]): strictly increasing,
//!   gap-free numbers per `(prefix, period)` scope under concurrent callers.
//!   Generation through the external entry point is disabled by default.
//! - **Archive recording** ([`ArchiveRecorder`]): one immutable record per
//!   deleted number, carrying a versioned SHA-256 digest of the content.
//! - **Rate limiting** ([`RateLimiter`]): token bucket, sliding window or
//!   fixed window per `(caller, endpoint class)`, failing closed behind a
//!   circuit breaker.
//!
//! ## Policies
//!
//! ```rust
//! use docnum_guard::{RateLimitPolicy, SlidingWindowPolicy};
//! use std::time::{Duration, Instant};
//!
//! let mut policy = SlidingWindowPolicy::new(100, Duration::from_secs(60)).unwrap();
//! let now = Instant::now();
//!
//! let admitted = (0..130)
//!     .filter(|_| policy.register_request(now).is_admitted())
//!     .count();
//! assert_eq!(admitted, 100);
//! ```
//!
//! ## Configuration
//!
//! [`GuardConfig`] deserializes from any serde format, so the host
//! application can keep the settings in its own config file and call
//! [`DocumentGuard::from_config`].
//!
//! ## Feature flags
//!
//! - `async` (default): periodic window sweeper on tokio
//! - `redis-storage`: Redis counter and archive stores
//! - `test-helpers`: exposes [`infrastructure::mocks`] for downstream tests
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    archive::{ArchiveRecord, ContentDigest, DigestAlgorithm},
    caller::{CallerId, EndpointClass, RateKey},
    pattern::{validate, validate_period, validate_prefix, validate_suffix, ValidationError},
    policy::{
        Admission, FixedWindowPolicy, Policy, PolicyError, PolicySpec, RateLimitPolicy,
        SlidingWindowPolicy, TokenBucketPolicy,
    },
    scope::{DocumentNumber, NumberScope, ScopeKey},
};

pub use application::{
    allocator::{AllocationError, AllocatorConfig, GenerateRequest, IssuedNumber, SequenceAllocator},
    archive::{ArchiveError, ArchiveOutcome, ArchiveRecorder},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    limiter::{LimiterError, RateLimiter},
    metrics::{Metrics, MetricsSnapshot},
    ports::{ArchiveInsert, ArchiveStore, Clock, CounterStore, Storage, StoreError},
    registry::{EndpointPolicies, WindowRegistry},
    sweeper::{SweeperConfig, SweeperConfigError, WindowSweeper},
};

#[cfg(feature = "async")]
pub use application::sweeper::{ShutdownError, SweeperHandle};

pub use infrastructure::{
    archive_store::InMemoryArchiveStore,
    clock::SystemClock,
    counter::InMemoryCounterStore,
    guard::{
        BuildError, CircuitBreakerSettings, DocumentGuard, DocumentGuardBuilder, GuardConfig,
        GuardError, StatusHint, WindowStorage, GENERATE_ENDPOINT,
    },
    storage::ShardedStorage,
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisArchiveStore, RedisCounterStore, RedisStoreConfig};

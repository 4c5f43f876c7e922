//! Request-facing facade.
//!
//! [`DocumentGuard`] wires the rate limiter, validator, allocator and archive
//! recorder into the order a request gateway needs them:
//!
//! - generic routes: rate limiter only ([`DocumentGuard::guard`])
//! - number generation: rate limiter, then validation and allocation
//!   ([`DocumentGuard::generate`])
//! - document deletion: archive recording after the live delete
//!   ([`DocumentGuard::archive_deleted`])
//!
//! Every failure is a [`GuardError`] whose [`StatusHint`] tells the gateway
//! which HTTP status to answer with.

use crate::application::{
    allocator::{AllocationError, AllocatorConfig, GenerateRequest, IssuedNumber, SequenceAllocator},
    archive::{ArchiveError, ArchiveOutcome, ArchiveRecorder},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    limiter::{LimiterError, RateLimiter},
    metrics::Metrics,
    ports::{ArchiveStore, Clock, CounterStore},
    registry::{EndpointPolicies, WindowRegistry},
    sweeper::{SweeperConfig, SweeperConfigError, WindowSweeper},
};
use crate::domain::{
    caller::{CallerId, EndpointClass, RateKey},
    policy::{Admission, Policy, PolicyError, PolicySpec},
    scope::{DocumentNumber, ScopeKey},
};
use crate::infrastructure::archive_store::InMemoryArchiveStore;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::counter::InMemoryCounterStore;
use crate::infrastructure::storage::ShardedStorage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "async")]
use crate::application::sweeper::SweeperHandle;

/// Endpoint class charged by [`DocumentGuard::generate`].
pub const GENERATE_ENDPOINT: &str = "generate";

/// Storage used for rate windows.
pub type WindowStorage = Arc<ShardedStorage<RateKey, Policy>>;

/// Error returned when building a [`DocumentGuard`] fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// Lock timeout must be greater than zero
    #[error("lock_timeout must be greater than 0")]
    ZeroLockTimeout,
    /// Circuit breaker failure threshold must be greater than zero
    #[error("circuit breaker failure_threshold must be greater than 0")]
    ZeroFailureThreshold,
    /// A configured policy is invalid
    #[error("invalid policy for {}: {source}", .endpoint.as_deref().unwrap_or("default"))]
    InvalidPolicy {
        /// Endpoint class of the policy, `None` for the default policy
        endpoint: Option<String>,
        /// Why the policy was rejected
        source: PolicyError,
    },
    /// Sweeper configuration validation failed
    #[error("sweeper configuration error: {0}")]
    SweeperConfig(#[from] SweeperConfigError),
}

/// Circuit breaker settings as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive limiter failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open, in milliseconds
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
        }
    }
}

/// Guard configuration, loadable from a host application's config file.
///
/// ```
/// use docnum_guard::GuardConfig;
///
/// let config: GuardConfig = serde_json::from_str(r#"{
///     "allocation_enabled": true,
///     "endpoint_policies": {
///         "export": { "kind": "fixed_window", "max_requests": 5, "window_secs": 60 }
///     }
/// }"#).unwrap();
///
/// assert!(config.allocation_enabled);
/// assert_eq!(config.number_width, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Whether the generate entry point issues numbers
    pub allocation_enabled: bool,
    /// First number issued for a fresh scope
    pub starting_number: u64,
    /// Zero-pad width of rendered numbers
    pub number_width: usize,
    /// Bounded wait for per-key locks, in milliseconds
    pub lock_timeout_ms: u64,
    /// Reject archive records for numbers that were never issued
    pub enforce_allocated: bool,
    /// Rate policy for endpoint classes without an override
    pub default_policy: PolicySpec,
    /// Rate policy overrides keyed by endpoint class
    pub endpoint_policies: BTreeMap<String, PolicySpec>,
    /// How often idle rate windows are swept, in seconds
    pub sweep_interval_secs: u64,
    /// Circuit breaker guarding the limiter
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for GuardConfig {
    fn default() -> Self {
        let allocator = AllocatorConfig::default();
        Self {
            allocation_enabled: allocator.enabled,
            starting_number: allocator.starting_number,
            number_width: allocator.number_width,
            lock_timeout_ms: 250,
            enforce_allocated: true,
            default_policy: PolicySpec::default(),
            endpoint_policies: BTreeMap::new(),
            sweep_interval_secs: SweeperConfig::default().interval.as_secs(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

/// Builder for constructing a [`DocumentGuard`].
pub struct DocumentGuardBuilder {
    config: GuardConfig,
    policy: Option<Policy>,
    endpoint_overrides: Vec<(EndpointClass, Policy)>,
    clock: Option<Arc<dyn Clock>>,
    counter_store: Option<Arc<dyn CounterStore>>,
    archive_store: Option<Arc<dyn ArchiveStore>>,
}

impl DocumentGuardBuilder {
    /// Replace all settings with `config`.
    ///
    /// Policies set with [`with_policy`](Self::with_policy) or
    /// [`with_endpoint_policy`](Self::with_endpoint_policy) still take
    /// precedence over the policies in `config`.
    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Turn the generate entry point on or off.
    pub fn with_allocation_enabled(mut self, enabled: bool) -> Self {
        self.config.allocation_enabled = enabled;
        self
    }

    /// Set the first number issued for a fresh scope.
    pub fn with_starting_number(mut self, starting_number: u64) -> Self {
        self.config.starting_number = starting_number;
        self
    }

    /// Set the zero-pad width of rendered numbers.
    pub fn with_number_width(mut self, width: usize) -> Self {
        self.config.number_width = width;
        self
    }

    /// Set the bounded wait for per-key locks (millisecond precision).
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Require archived numbers to have been issued by the counter store.
    pub fn with_enforce_allocated(mut self, enforce: bool) -> Self {
        self.config.enforce_allocated = enforce;
        self
    }

    /// Set the rate policy for endpoint classes without an override.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the rate policy of one endpoint class.
    pub fn with_endpoint_policy(mut self, endpoint: impl Into<EndpointClass>, policy: Policy) -> Self {
        self.endpoint_overrides.push((endpoint.into(), policy));
        self
    }

    /// Set how often idle rate windows are swept (second precision).
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval_secs = interval.as_secs();
        self
    }

    /// Configure the limiter's circuit breaker.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = CircuitBreakerSettings {
            failure_threshold: config.failure_threshold,
            recovery_timeout_ms: config.recovery_timeout.as_millis() as u64,
        };
        self
    }

    /// Set a custom clock (mainly for tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Keep number counters in `store` instead of process memory.
    pub fn with_counter_store(mut self, store: impl CounterStore + 'static) -> Self {
        self.counter_store = Some(Arc::new(store));
        self
    }

    /// Keep archive records in `store` instead of process memory.
    pub fn with_archive_store(mut self, store: impl ArchiveStore + 'static) -> Self {
        self.archive_store = Some(Arc::new(store));
        self
    }

    /// Build the guard.
    ///
    /// # Errors
    /// Returns `BuildError` if a setting is zero where it must not be or a
    /// configured policy is invalid.
    pub fn build(self) -> Result<DocumentGuard, BuildError> {
        let config = self.config;

        if config.lock_timeout_ms == 0 {
            return Err(BuildError::ZeroLockTimeout);
        }
        if config.circuit_breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }
        // Let SweeperConfig validate the interval
        let sweeper_config = SweeperConfig::new(Duration::from_secs(config.sweep_interval_secs))?;

        let default_policy = match self.policy {
            Some(policy) => policy,
            None => config
                .default_policy
                .build()
                .map_err(|source| BuildError::InvalidPolicy {
                    endpoint: None,
                    source,
                })?,
        };

        let mut endpoint_policies = EndpointPolicies::default();
        for (endpoint, spec) in &config.endpoint_policies {
            let policy = spec.build().map_err(|source| BuildError::InvalidPolicy {
                endpoint: Some(endpoint.clone()),
                source,
            })?;
            endpoint_policies.insert(EndpointClass::new(endpoint), policy);
        }
        endpoint_policies.extend(self.endpoint_overrides);

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
        let counters: Arc<dyn CounterStore> = match self.counter_store {
            Some(store) => store,
            None => Arc::new(InMemoryCounterStore::with_lock_timeout(lock_timeout)),
        };
        let archive: Arc<dyn ArchiveStore> = match self.archive_store {
            Some(store) => store,
            None => Arc::new(InMemoryArchiveStore::new()),
        };

        let metrics = Metrics::new();
        let circuit_breaker = Arc::new(CircuitBreaker::with_clock(
            CircuitBreakerConfig::from(&config.circuit_breaker),
            Arc::clone(&clock),
        ));
        let registry = WindowRegistry::with_endpoint_policies(
            Arc::new(ShardedStorage::with_lock_timeout(lock_timeout)),
            Arc::clone(&clock),
            default_policy,
            endpoint_policies,
        );
        let limiter = RateLimiter::new(registry, metrics.clone(), circuit_breaker);

        let allocator = SequenceAllocator::new(
            Arc::clone(&counters),
            AllocatorConfig {
                enabled: config.allocation_enabled,
                starting_number: config.starting_number,
                number_width: config.number_width,
            },
            metrics.clone(),
        );
        let recorder = ArchiveRecorder::new(
            archive,
            counters,
            clock,
            config.enforce_allocated,
            config.starting_number,
            metrics.clone(),
        );

        tracing::debug!(
            allocation_enabled = config.allocation_enabled,
            enforce_allocated = config.enforce_allocated,
            lock_timeout_ms = config.lock_timeout_ms,
            "document guard built"
        );

        Ok(DocumentGuard {
            limiter,
            allocator: Arc::new(allocator),
            recorder: Arc::new(recorder),
            sweeper_config,
            metrics,
        })
    }
}

/// How a gateway should answer a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusHint {
    /// The caller exceeded its rate ceiling
    TooManyRequests,
    /// The feature is administratively disabled
    Gone,
    /// The input is malformed
    BadRequest,
    /// A dependency is failing; retry later
    ServiceUnavailable,
    /// The request clashes with existing state
    Conflict,
    /// Needs operator attention
    InternalError,
}

impl StatusHint {
    /// The conventional HTTP status code.
    pub fn http_status(self) -> u16 {
        match self {
            StatusHint::TooManyRequests => 429,
            StatusHint::Gone => 410,
            StatusHint::BadRequest => 400,
            StatusHint::ServiceUnavailable => 503,
            StatusHint::Conflict => 409,
            StatusHint::InternalError => 500,
        }
    }
}

/// Errors returned by [`DocumentGuard`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The caller exceeded its rate ceiling
    #[error("too many requests, retry after {retry_after:?}")]
    RateLimited {
        /// How long the caller should wait
        retry_after: Duration,
    },
    /// The limiter could not decide
    #[error(transparent)]
    Limiter(#[from] LimiterError),
    /// Number generation failed
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// Archive recording failed
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl GuardError {
    /// How a gateway should answer this error.
    pub fn status_hint(&self) -> StatusHint {
        match self {
            GuardError::RateLimited { .. } => StatusHint::TooManyRequests,
            GuardError::Limiter(_) => StatusHint::ServiceUnavailable,
            GuardError::Allocation(error) => match error {
                AllocationError::InvalidScope(_) => StatusHint::BadRequest,
                AllocationError::AllocationDisabled => StatusHint::Gone,
                AllocationError::StorageUnavailable(_) => StatusHint::ServiceUnavailable,
                AllocationError::CounterOverflow { .. } => StatusHint::InternalError,
            },
            GuardError::Archive(error) => match error {
                ArchiveError::AlreadyArchived { .. } => StatusHint::Conflict,
                ArchiveError::NeverAllocated { .. } => StatusHint::BadRequest,
                ArchiveError::StorageUnavailable(_) => StatusHint::ServiceUnavailable,
                ArchiveError::ArchiveAfterDeleteFailed { .. } => StatusHint::InternalError,
            },
        }
    }

    /// Retry hint for rate limiting and limiter outages.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimited { retry_after } => Some(*retry_after),
            GuardError::Limiter(error) => Some(error.retry_after()),
            _ => None,
        }
    }
}

/// Entry point tying admission control, allocation and archiving together.
#[derive(Debug, Clone)]
pub struct DocumentGuard {
    limiter: RateLimiter<WindowStorage>,
    allocator: Arc<SequenceAllocator>,
    recorder: Arc<ArchiveRecorder>,
    sweeper_config: SweeperConfig,
    metrics: Metrics,
}

impl DocumentGuard {
    /// Create a builder for configuring the guard.
    ///
    /// Defaults:
    /// - Generation: disabled
    /// - Policy: sliding window, 100 requests per 60 seconds
    /// - Lock timeout: 250 ms
    /// - Referential checks on archiving: enabled
    /// - Stores: in memory
    pub fn builder() -> DocumentGuardBuilder {
        DocumentGuardBuilder {
            config: GuardConfig::default(),
            policy: None,
            endpoint_overrides: Vec::new(),
            clock: None,
            counter_store: None,
            archive_store: None,
        }
    }

    /// Build a guard with in-memory stores from `config`.
    pub fn from_config(config: GuardConfig) -> Result<Self, BuildError> {
        Self::builder().with_config(config).build()
    }

    /// Charge one request of `caller` against `endpoint`.
    pub fn guard(&self, caller: &CallerId, endpoint: &EndpointClass) -> Result<(), GuardError> {
        match self.limiter.admit_now(caller, endpoint)? {
            Admission::Admitted => Ok(()),
            Admission::Rejected { retry_after } => Err(GuardError::RateLimited { retry_after }),
        }
    }

    /// Rate-limit, validate and issue a number.
    ///
    /// The request is charged against [`GENERATE_ENDPOINT`] even when
    /// generation is disabled.
    pub fn generate(
        &self,
        caller: &CallerId,
        request: &GenerateRequest,
    ) -> Result<IssuedNumber, GuardError> {
        self.guard(caller, &EndpointClass::new(GENERATE_ENDPOINT))?;
        Ok(self.allocator.generate(request)?)
    }

    /// Record the archive entry for a document the caller just deleted.
    pub fn archive_deleted(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
        reason: Option<&str>,
        raw_content: Option<&[u8]>,
    ) -> Result<ArchiveOutcome, GuardError> {
        Ok(self
            .recorder
            .archive_after_delete(scope, number, reason, raw_content)?)
    }

    /// Remove idle rate windows now. Returns how many were removed.
    pub fn sweep_now(&self) -> usize {
        self.sweeper().sweep()
    }

    /// Start the periodic window sweeper on the current tokio runtime.
    #[cfg(feature = "async")]
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.sweeper().start()
    }

    fn sweeper(&self) -> WindowSweeper<WindowStorage> {
        WindowSweeper::new(
            self.limiter.registry().clone(),
            self.sweeper_config.clone(),
            self.metrics.clone(),
        )
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the allocator.
    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    /// Get a reference to the archive recorder.
    pub fn recorder(&self) -> &ArchiveRecorder {
        &self.recorder
    }

    /// Get a reference to the rate limiter.
    pub fn limiter(&self) -> &RateLimiter<WindowStorage> {
        &self.limiter
    }
}

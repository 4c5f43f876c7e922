//! Document number allocation.
//!
//! The allocator issues strictly increasing numbers per scope. Uniqueness and
//! ordering come from the [`CounterStore`], which advances each scope's
//! counter atomically; the allocator validates input first so malformed
//! scopes never reach the counters.
//!
//! ## Gap policy
//!
//! Committed numbers are gap-free. A number whose owning document is never
//! persisted (the request was cancelled or failed after allocation) stays
//! consumed: counters are never rolled back, because a rollback could hand
//! the same number to a concurrent caller.
//!
//! ## Administrative lockout
//!
//! The external generate entry point ([`SequenceAllocator::generate`]) is
//! guarded by a runtime flag and refuses every request with
//! [`AllocationError::AllocationDisabled`] while the flag is off.
//! [`SequenceAllocator::allocate`] is not affected by the flag.

use crate::application::metrics::Metrics;
use crate::application::ports::{CounterStore, StoreError};
use crate::domain::pattern::{self, ValidationError};
use crate::domain::scope::{DocumentNumber, NumberScope, ScopeKey};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Prefix, suffix or period failed validation
    #[error("invalid scope: {0}")]
    InvalidScope(#[from] ValidationError),
    /// Number generation is administratively disabled
    #[error("document number generation is disabled")]
    AllocationDisabled,
    /// Counter backend failed transiently
    #[error("counter storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),
    /// The scope's counter is exhausted; the scope must be retired
    #[error("counter for scope {scope} is exhausted")]
    CounterOverflow {
        /// The exhausted scope
        scope: ScopeKey,
    },
}

impl AllocationError {
    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::StorageUnavailable(_))
    }

    fn from_store(scope: &ScopeKey, error: StoreError) -> Self {
        match error {
            StoreError::Overflow => AllocationError::CounterOverflow {
                scope: scope.clone(),
            },
            other => AllocationError::StorageUnavailable(other),
        }
    }
}

/// Allocator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Whether the generate entry point issues numbers
    pub enabled: bool,
    /// First number issued for a fresh scope
    pub starting_number: u64,
    /// Zero-pad width used when rendering numbers
    pub number_width: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            starting_number: 1,
            number_width: 4,
        }
    }
}

/// Request received by the generate entry point.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Counter prefix
    pub prefix: String,
    /// Suffix appended when rendering
    #[serde(default)]
    pub suffix: String,
    /// Counter period, e.g. a fiscal year
    #[serde(default)]
    pub period: String,
}

impl GenerateRequest {
    /// Build a request.
    pub fn new(
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        period: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            period: period.into(),
        }
    }
}

/// A number handed out by the generate entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedNumber {
    /// The scope the number belongs to
    pub scope: NumberScope,
    /// The raw number
    pub number: DocumentNumber,
    /// Display form, e.g. `DOC-0042/2025`
    pub rendered: String,
}

/// Issues document numbers.
#[derive(Debug)]
pub struct SequenceAllocator {
    store: Arc<dyn CounterStore>,
    enabled: AtomicBool,
    starting_number: u64,
    number_width: usize,
    metrics: Metrics,
}

impl SequenceAllocator {
    /// Create an allocator over a counter store.
    pub fn new(store: Arc<dyn CounterStore>, config: AllocatorConfig, metrics: Metrics) -> Self {
        Self {
            store,
            enabled: AtomicBool::new(config.enabled),
            starting_number: config.starting_number,
            number_width: config.number_width,
            metrics,
        }
    }

    /// Issue the next number for `scope`.
    ///
    /// # Errors
    /// - `InvalidScope` if the scope does not pass validation
    /// - `StorageUnavailable` if the counter store failed transiently
    /// - `CounterOverflow` if the scope cannot issue further numbers
    pub fn allocate(&self, scope: &NumberScope) -> Result<DocumentNumber, AllocationError> {
        pattern::validate(scope.prefix(), scope.suffix_template())?;
        pattern::validate_period(scope.period())?;

        let key = scope.key();
        match self.store.next(key, self.starting_number) {
            Ok(value) => {
                self.metrics.record_allocated();
                if value == self.starting_number {
                    tracing::info!(scope = %key, number = value, "opened new number scope");
                } else {
                    tracing::debug!(scope = %key, number = value, "allocated document number");
                }
                Ok(DocumentNumber::new(value))
            }
            Err(error) => {
                self.metrics.record_allocation_failure();
                let error = AllocationError::from_store(key, error);
                match &error {
                    AllocationError::CounterOverflow { .. } => {
                        tracing::error!(scope = %key, "counter exhausted; scope must be retired");
                    }
                    _ => {
                        tracing::warn!(scope = %key, error = %error, "document number allocation failed");
                    }
                }
                Err(error)
            }
        }
    }

    /// The administrative generate entry point.
    ///
    /// While generation is disabled this returns `AllocationDisabled` for
    /// every request, without looking at it.
    pub fn generate(&self, request: &GenerateRequest) -> Result<IssuedNumber, AllocationError> {
        if !self.is_enabled() {
            self.metrics.record_allocation_refused();
            tracing::debug!("generate request refused: allocation disabled");
            return Err(AllocationError::AllocationDisabled);
        }

        let scope = NumberScope::new(
            request.prefix.clone(),
            request.suffix.clone(),
            request.period.clone(),
        )?;
        let number = self.allocate(&scope)?;
        let rendered = number.render(&scope, self.number_width);

        Ok(IssuedNumber {
            scope,
            number,
            rendered,
        })
    }

    /// The last number issued for `key`, if any.
    pub fn current(&self, key: &ScopeKey) -> Result<Option<DocumentNumber>, AllocationError> {
        self.store
            .last_issued(key)
            .map(|last| last.map(DocumentNumber::new))
            .map_err(|e| AllocationError::from_store(key, e))
    }

    /// Whether the generate entry point issues numbers.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn the generate entry point on or off.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!(enabled, "document number generation toggled");
        }
    }

    /// First number issued for a fresh scope.
    pub fn starting_number(&self) -> u64 {
        self.starting_number
    }

    /// The counter store behind this allocator.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::counter::InMemoryCounterStore;
    use crate::infrastructure::mocks::FlakyCounterStore;

    fn allocator(enabled: bool) -> SequenceAllocator {
        SequenceAllocator::new(
            Arc::new(InMemoryCounterStore::new()),
            AllocatorConfig {
                enabled,
                ..AllocatorConfig::default()
            },
            Metrics::new(),
        )
    }

    #[test]
    fn test_allocate_is_sequential_per_scope() {
        let allocator = allocator(false);
        let doc = NumberScope::new("DOC", "/2025", "2025").unwrap();
        let mou = NumberScope::new("MOU", "", "2025").unwrap();

        assert_eq!(allocator.allocate(&doc), Ok(DocumentNumber::new(1)));
        assert_eq!(allocator.allocate(&doc), Ok(DocumentNumber::new(2)));
        assert_eq!(allocator.allocate(&mou), Ok(DocumentNumber::new(1)));
        assert_eq!(allocator.allocate(&doc), Ok(DocumentNumber::new(3)));

        assert_eq!(allocator.current(doc.key()), Ok(Some(DocumentNumber::new(3))));
        assert_eq!(
            allocator.current(&ScopeKey::new("NEW", "").unwrap()),
            Ok(None)
        );
    }

    #[test]
    fn test_allocate_ignores_disabled_flag() {
        let allocator = allocator(false);
        let scope = NumberScope::new("DOC", "", "").unwrap();
        assert!(allocator.allocate(&scope).is_ok());
    }

    #[test]
    fn test_generate_disabled_refuses_everything() {
        let allocator = allocator(false);

        for request in [
            GenerateRequest::new("DOC", "/2025", "2025"),
            GenerateRequest::new("", "", ""),
            GenerateRequest::new("BAD PREFIX", "x y", "?"),
        ] {
            assert_eq!(
                allocator.generate(&request),
                Err(AllocationError::AllocationDisabled)
            );
        }
        assert_eq!(allocator.metrics.allocations_refused(), 3);
        assert_eq!(allocator.metrics.numbers_allocated(), 0);
    }

    #[test]
    fn test_generate_enabled() {
        let allocator = allocator(true);

        let issued = allocator
            .generate(&GenerateRequest::new("DOC", "/2025", "2025"))
            .unwrap();
        assert_eq!(issued.number, DocumentNumber::new(1));
        assert_eq!(issued.rendered, "DOC-0001/2025");

        let err = allocator
            .generate(&GenerateRequest::new("DOC", "2025 ", "2025"))
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::InvalidScope(ValidationError::InvalidSuffix { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_toggle() {
        let allocator = allocator(false);
        let request = GenerateRequest::new("DOC", "", "");

        allocator.set_enabled(true);
        assert!(allocator.generate(&request).is_ok());

        allocator.set_enabled(false);
        assert_eq!(
            allocator.generate(&request),
            Err(AllocationError::AllocationDisabled)
        );

        // the counter kept its position while disabled
        allocator.set_enabled(true);
        assert_eq!(allocator.generate(&request).unwrap().number.get(), 2);
    }

    #[test]
    fn test_starting_number() {
        let allocator = SequenceAllocator::new(
            Arc::new(InMemoryCounterStore::new()),
            AllocatorConfig {
                starting_number: 1000,
                ..AllocatorConfig::default()
            },
            Metrics::new(),
        );
        let scope = NumberScope::new("DOC", "", "").unwrap();

        assert_eq!(allocator.allocate(&scope).unwrap().get(), 1000);
        assert_eq!(allocator.allocate(&scope).unwrap().get(), 1001);
    }

    #[test]
    fn test_storage_failure_is_retryable_and_burns_nothing() {
        let allocator = SequenceAllocator::new(
            Arc::new(FlakyCounterStore::unavailable(1)),
            AllocatorConfig::default(),
            Metrics::new(),
        );
        let scope = NumberScope::new("DOC", "", "").unwrap();

        let err = allocator.allocate(&scope).unwrap_err();
        assert!(matches!(err, AllocationError::StorageUnavailable(_)));
        assert!(err.is_retryable());

        assert_eq!(allocator.allocate(&scope), Ok(DocumentNumber::new(1)));
        assert_eq!(allocator.metrics.allocations_failed(), 1);
    }

    #[test]
    fn test_overflow_is_fatal_for_scope() {
        let allocator = SequenceAllocator::new(
            Arc::new(InMemoryCounterStore::new()),
            AllocatorConfig {
                starting_number: u64::MAX,
                ..AllocatorConfig::default()
            },
            Metrics::new(),
        );
        let scope = NumberScope::new("DOC", "", "").unwrap();

        assert_eq!(allocator.allocate(&scope).unwrap().get(), u64::MAX);
        let err = allocator.allocate(&scope).unwrap_err();
        assert_eq!(
            err,
            AllocationError::CounterOverflow {
                scope: scope.key().clone()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: AllocatorConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.starting_number, 1);
        assert_eq!(config.number_width, 4);
    }
}

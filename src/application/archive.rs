//! Archive recording for deleted numbered documents.
//!
//! Deleting a numbered document must leave a trace: the recorder writes one
//! immutable [`ArchiveRecord`] per `(scope, number)`, holding the deletion
//! time, an optional reason and a digest of the deleted content. The number
//! itself stays consumed.
//!
//! The recorder never touches the live document. The delete path removes
//! the live row first and then calls [`ArchiveRecorder::archive_after_delete`];
//! a failure at that point leaves a deleted document without an archive
//! record and is reported as [`ArchiveError::ArchiveAfterDeleteFailed`] for
//! manual reconciliation.

use crate::application::metrics::Metrics;
use crate::application::ports::{ArchiveInsert, ArchiveStore, Clock, CounterStore, StoreError};
use crate::domain::archive::{ArchiveRecord, ContentDigest};
use crate::domain::scope::{DocumentNumber, ScopeKey};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the archive recorder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// A record for this number exists; it was left unchanged
    #[error("document {} of scope {} is already archived", .existing.number(), .existing.scope())]
    AlreadyArchived {
        /// The record written by the first call
        existing: Box<ArchiveRecord>,
    },
    /// The number was never issued for the scope
    #[error("document {number} was never allocated in scope {scope}")]
    NeverAllocated {
        /// Scope of the rejected record
        scope: ScopeKey,
        /// The unknown number
        number: DocumentNumber,
    },
    /// Archive or counter backend failed transiently
    #[error("archive storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),
    /// The live document is gone but no matching archive record exists
    #[error("document {number} of scope {scope} was deleted but could not be archived")]
    ArchiveAfterDeleteFailed {
        /// Scope of the deleted document
        scope: ScopeKey,
        /// Number of the deleted document
        number: DocumentNumber,
        /// What went wrong
        source: Box<ArchiveError>,
    },
}

/// Successful outcome of [`ArchiveRecorder::archive_after_delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// A new record was written
    Recorded(ArchiveRecord),
    /// A matching record from an earlier attempt already exists
    AlreadyRecorded(ArchiveRecord),
}

impl ArchiveOutcome {
    /// The record now stored for the number.
    pub fn record(&self) -> &ArchiveRecord {
        match self {
            ArchiveOutcome::Recorded(record) | ArchiveOutcome::AlreadyRecorded(record) => record,
        }
    }
}

/// Writes archive records for deleted documents.
#[derive(Debug)]
pub struct ArchiveRecorder {
    archive: Arc<dyn ArchiveStore>,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    enforce_allocated: bool,
    starting_number: u64,
    metrics: Metrics,
}

impl ArchiveRecorder {
    /// Create a recorder.
    ///
    /// `counters` is consulted to reject numbers that were never issued when
    /// `enforce_allocated` is set. Issued numbers of a scope run from
    /// `starting_number` up to its counter, so it must match the allocator's.
    pub fn new(
        archive: Arc<dyn ArchiveStore>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        enforce_allocated: bool,
        starting_number: u64,
        metrics: Metrics,
    ) -> Self {
        Self {
            archive,
            counters,
            clock,
            enforce_allocated,
            starting_number,
            metrics,
        }
    }

    /// Write the archive record for a deleted document.
    ///
    /// Only the SHA-256 digest of `raw_content` is stored.
    ///
    /// # Errors
    /// - `AlreadyArchived` if a record exists, carrying that record
    /// - `NeverAllocated` if referential checks are on and the number was
    ///   never issued
    /// - `StorageUnavailable` on backend failure
    pub fn archive_on_delete(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
        reason: Option<&str>,
        raw_content: Option<&[u8]>,
    ) -> Result<ArchiveRecord, ArchiveError> {
        if self.enforce_allocated {
            self.ensure_allocated(scope, number)?;
        }

        let record = ArchiveRecord::new(
            scope.clone(),
            number,
            self.clock.system_time(),
            reason.map(str::to_owned),
            raw_content,
        );

        match self
            .archive
            .insert_new(record.clone())
            .map_err(ArchiveError::StorageUnavailable)?
        {
            ArchiveInsert::Inserted => {
                self.metrics.record_archived();
                tracing::info!(
                    scope = %scope,
                    number = number.get(),
                    hashed = record.content_hash().is_some(),
                    "archived deleted document"
                );
                Ok(record)
            }
            ArchiveInsert::Existing(existing) => {
                tracing::debug!(scope = %scope, number = number.get(), "document already archived");
                Err(ArchiveError::AlreadyArchived {
                    existing: Box::new(existing),
                })
            }
        }
    }

    /// Archive from the delete code path, after the live record is gone.
    ///
    /// A retry that finds a record with the same reason and digest succeeds
    /// with [`ArchiveOutcome::AlreadyRecorded`]. Every other failure is
    /// wrapped in `ArchiveAfterDeleteFailed`.
    pub fn archive_after_delete(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
        reason: Option<&str>,
        raw_content: Option<&[u8]>,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let source = match self.archive_on_delete(scope, number, reason, raw_content) {
            Ok(record) => return Ok(ArchiveOutcome::Recorded(record)),
            Err(ArchiveError::AlreadyArchived { existing }) => {
                let digest = raw_content.map(ContentDigest::of);
                if existing.same_deletion(reason, digest.as_ref()) {
                    return Ok(ArchiveOutcome::AlreadyRecorded(*existing));
                }
                tracing::warn!(
                    scope = %scope,
                    number = number.get(),
                    "archive retry does not match the existing record"
                );
                ArchiveError::AlreadyArchived { existing }
            }
            Err(other) => other,
        };

        self.metrics.record_archive_failure();
        tracing::error!(
            scope = %scope,
            number = number.get(),
            error = %source,
            "deleted document could not be archived; manual reconciliation required"
        );
        Err(ArchiveError::ArchiveAfterDeleteFailed {
            scope: scope.clone(),
            number,
            source: Box::new(source),
        })
    }

    /// The archive record for a number, if one exists.
    pub fn lookup(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
    ) -> Result<Option<ArchiveRecord>, ArchiveError> {
        self.archive
            .get(scope, number)
            .map_err(ArchiveError::StorageUnavailable)
    }

    /// Whether `content` matches what was archived for a number.
    ///
    /// `Ok(None)` when there is no record or the record carries no digest.
    pub fn verify(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
        content: &[u8],
    ) -> Result<Option<bool>, ArchiveError> {
        Ok(self
            .lookup(scope, number)?
            .and_then(|record| record.verify(content)))
    }

    fn ensure_allocated(&self, scope: &ScopeKey, number: DocumentNumber) -> Result<(), ArchiveError> {
        let last = self
            .counters
            .last_issued(scope)
            .map_err(ArchiveError::StorageUnavailable)?;

        match last {
            Some(last) if (self.starting_number..=last).contains(&number.get()) => Ok(()),
            _ => Err(ArchiveError::NeverAllocated {
                scope: scope.clone(),
                number,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::archive_store::InMemoryArchiveStore;
    use crate::infrastructure::counter::InMemoryCounterStore;
    use crate::infrastructure::mocks::{FailingArchiveStore, MockClock};
    use std::time::{Duration, Instant, SystemTime};

    struct Fixture {
        recorder: ArchiveRecorder,
        counters: Arc<InMemoryCounterStore>,
        clock: MockClock,
        metrics: Metrics,
    }

    fn fixture_starting_at(
        archive: Arc<dyn ArchiveStore>,
        enforce_allocated: bool,
        starting_number: u64,
    ) -> Fixture {
        let counters = Arc::new(InMemoryCounterStore::new());
        let clock = MockClock::new(Instant::now());
        let metrics = Metrics::new();
        let recorder = ArchiveRecorder::new(
            archive,
            counters.clone(),
            Arc::new(clock.clone()),
            enforce_allocated,
            starting_number,
            metrics.clone(),
        );
        Fixture {
            recorder,
            counters,
            clock,
            metrics,
        }
    }

    fn fixture_with(archive: Arc<dyn ArchiveStore>, enforce_allocated: bool) -> Fixture {
        fixture_starting_at(archive, enforce_allocated, 1)
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryArchiveStore::new()), true)
    }

    fn scope() -> ScopeKey {
        ScopeKey::new("DOC", "2025").unwrap()
    }

    fn issue(fx: &Fixture, count: u64) {
        for _ in 0..count {
            fx.counters.next(&scope(), 1).unwrap();
        }
    }

    #[test]
    fn test_archive_records_digest_and_time() {
        let fx = fixture();
        issue(&fx, 3);
        fx.clock.advance(Duration::from_secs(42));

        let record = fx
            .recorder
            .archive_on_delete(&scope(), DocumentNumber::new(2), Some("duplicate"), Some(b"body"))
            .unwrap();

        assert_eq!(record.number(), DocumentNumber::new(2));
        assert_eq!(record.reason(), Some("duplicate"));
        assert_eq!(
            record.deleted_at(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(42)
        );
        assert_eq!(record.content_hash(), Some(&ContentDigest::of(b"body")));
        assert_eq!(fx.metrics.archives_recorded(), 1);
    }

    #[test]
    fn test_second_archive_is_rejected_and_first_kept() {
        let fx = fixture();
        issue(&fx, 1);
        let number = DocumentNumber::new(1);

        let first = fx
            .recorder
            .archive_on_delete(&scope(), number, None, Some(b"original"))
            .unwrap();
        let err = fx
            .recorder
            .archive_on_delete(&scope(), number, Some("again"), Some(b"tampered"))
            .unwrap_err();

        assert_eq!(
            err,
            ArchiveError::AlreadyArchived {
                existing: Box::new(first.clone())
            }
        );
        assert_eq!(fx.recorder.lookup(&scope(), number), Ok(Some(first)));
        assert_eq!(fx.metrics.archives_recorded(), 1);
    }

    #[test]
    fn test_never_allocated_is_rejected() {
        let fx = fixture();
        let err = fx
            .recorder
            .archive_on_delete(&scope(), DocumentNumber::new(1), None, None)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NeverAllocated { .. }));

        issue(&fx, 2);
        let err = fx
            .recorder
            .archive_on_delete(&scope(), DocumentNumber::new(3), None, None)
            .unwrap_err();
        assert_eq!(
            err,
            ArchiveError::NeverAllocated {
                scope: scope(),
                number: DocumentNumber::new(3)
            }
        );
        assert!(fx
            .recorder
            .archive_on_delete(&scope(), DocumentNumber::new(2), None, None)
            .is_ok());
    }

    #[test]
    fn test_numbers_below_start_were_never_allocated() {
        let fx = fixture_starting_at(Arc::new(InMemoryArchiveStore::new()), true, 1000);
        fx.counters.next(&scope(), 1000).unwrap();

        for below in [0, 5, 999] {
            assert_eq!(
                fx.recorder
                    .archive_on_delete(&scope(), DocumentNumber::new(below), None, None)
                    .unwrap_err(),
                ArchiveError::NeverAllocated {
                    scope: scope(),
                    number: DocumentNumber::new(below)
                }
            );
        }
        assert!(fx
            .recorder
            .archive_on_delete(&scope(), DocumentNumber::new(1000), None, None)
            .is_ok());
        assert_eq!(fx.metrics.archives_recorded(), 1);
    }

    #[test]
    fn test_number_zero_is_never_allocated() {
        let fx = fixture();
        issue(&fx, 3);
        assert!(matches!(
            fx.recorder
                .archive_on_delete(&scope(), DocumentNumber::new(0), None, None),
            Err(ArchiveError::NeverAllocated { .. })
        ));
    }

    #[test]
    fn test_unenforced_accepts_foreign_numbers() {
        let fx = fixture_with(Arc::new(InMemoryArchiveStore::new()), false);
        assert!(fx
            .recorder
            .archive_on_delete(&scope(), DocumentNumber::new(900), Some("migrated"), None)
            .is_ok());
    }

    #[test]
    fn test_archive_after_delete_matching_retry_succeeds() {
        let fx = fixture();
        issue(&fx, 1);
        let number = DocumentNumber::new(1);

        let first = fx
            .recorder
            .archive_after_delete(&scope(), number, Some("obsolete"), Some(b"body"))
            .unwrap();
        assert!(matches!(first, ArchiveOutcome::Recorded(_)));

        fx.clock.advance(Duration::from_secs(5));
        let retry = fx
            .recorder
            .archive_after_delete(&scope(), number, Some("obsolete"), Some(b"body"))
            .unwrap();
        assert_eq!(retry, ArchiveOutcome::AlreadyRecorded(first.record().clone()));
        assert_eq!(fx.metrics.archive_failures(), 0);
    }

    #[test]
    fn test_archive_after_delete_mismatch_needs_reconciliation() {
        let fx = fixture();
        issue(&fx, 1);
        let number = DocumentNumber::new(1);

        fx.recorder
            .archive_after_delete(&scope(), number, None, Some(b"body"))
            .unwrap();
        let err = fx
            .recorder
            .archive_after_delete(&scope(), number, None, Some(b"other body"))
            .unwrap_err();

        match err {
            ArchiveError::ArchiveAfterDeleteFailed {
                number: failed,
                source,
                ..
            } => {
                assert_eq!(failed, number);
                assert!(matches!(*source, ArchiveError::AlreadyArchived { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.metrics.archive_failures(), 1);
    }

    #[test]
    fn test_archive_after_delete_wraps_storage_failure() {
        let store = Arc::new(FailingArchiveStore::new());
        let fx = fixture_with(store.clone(), true);
        issue(&fx, 1);

        let err = fx
            .recorder
            .archive_after_delete(&scope(), DocumentNumber::new(1), None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::ArchiveAfterDeleteFailed { ref source, .. }
                if matches!(**source, ArchiveError::StorageUnavailable(_))
        ));

        store.set_failing(false);
        assert!(fx
            .recorder
            .archive_after_delete(&scope(), DocumentNumber::new(1), None, None)
            .is_ok());
    }

    #[test]
    fn test_verify() {
        let fx = fixture();
        issue(&fx, 2);

        fx.recorder
            .archive_on_delete(&scope(), DocumentNumber::new(1), None, Some(b"content"))
            .unwrap();
        fx.recorder
            .archive_on_delete(&scope(), DocumentNumber::new(2), None, None)
            .unwrap();

        let verify = |n: u64, content: &[u8]| {
            fx.recorder
                .verify(&scope(), DocumentNumber::new(n), content)
                .unwrap()
        };
        assert_eq!(verify(1, b"content"), Some(true));
        assert_eq!(verify(1, b"c0ntent"), Some(false));
        assert_eq!(verify(2, b"content"), None);
        assert_eq!(verify(3, b"content"), None);
    }
}

//! Counters describing what the subsystem has done.
//!
//! All counters use relaxed atomics: they are for dashboards and tests, not
//! for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, cheaply cloneable set of counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_admitted: AtomicU64,
    requests_rejected: AtomicU64,
    limiter_failures: AtomicU64,
    windows_swept: AtomicU64,
    numbers_allocated: AtomicU64,
    allocations_failed: AtomicU64,
    allocations_refused: AtomicU64,
    archives_recorded: AtomicU64,
    archive_failures: AtomicU64,
}

macro_rules! counters {
    ($( $(#[$doc:meta])* $field:ident => $record:ident ),* $(,)?) => {
        impl Metrics {
            $(
                pub(crate) fn $record(&self) {
                    self.inner.$field.fetch_add(1, Ordering::Relaxed);
                }

                $(#[$doc])*
                pub fn $field(&self) -> u64 {
                    self.inner.$field.load(Ordering::Relaxed)
                }
            )*

            /// Get a snapshot of all metrics.
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $( $field: self.$field(), )*
                }
            }

            /// Reset all metrics to zero.
            pub fn reset(&self) {
                $( self.inner.$field.store(0, Ordering::Relaxed); )*
            }
        }

        /// A point-in-time snapshot of metrics.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct MetricsSnapshot {
            $(
                $(#[$doc])*
                pub $field: u64,
            )*
        }
    };
}

counters! {
    /// Requests let through by the rate limiter
    requests_admitted => record_admitted,
    /// Requests turned away by the rate limiter
    requests_rejected => record_rejected,
    /// Admission checks that failed inside the limiter
    limiter_failures => record_limiter_failure,
    /// Idle rate windows removed by the sweeper
    windows_swept => record_window_swept,
    /// Document numbers issued
    numbers_allocated => record_allocated,
    /// Allocations that failed after validation
    allocations_failed => record_allocation_failure,
    /// Generate requests refused because allocation is disabled
    allocations_refused => record_allocation_refused,
    /// Archive records written
    archives_recorded => record_archived,
    /// Archive writes that failed after the live delete
    archive_failures => record_archive_failure,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSnapshot {
    /// Calculate the rejection rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been checked.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.requests_rejected as f64 / total as f64
        }
    }

    /// Get the total number of admission decisions (admitted + rejected).
    pub fn total_requests(&self) -> u64 {
        self.requests_admitted.saturating_add(self.requests_rejected)
    }
}

//! Removal of idle rate windows.
//!
//! Windows are created on a caller's first request and would otherwise live
//! forever. The sweeper drops every window whose policy reports it idle, so
//! memory stays proportional to recently active callers.

use crate::application::metrics::Metrics;
use crate::application::ports::Storage;
use crate::application::registry::WindowRegistry;
use crate::domain::caller::RateKey;
use crate::domain::policy::Policy;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "async")]
use tokio::sync::watch;
#[cfg(feature = "async")]
use tokio::task::JoinHandle;
#[cfg(feature = "async")]
use tokio::time::{interval, MissedTickBehavior};

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SweeperConfigError {
    /// Sweep interval must be greater than zero
    #[error("sweep interval must be greater than 0")]
    ZeroSweepInterval,
}

/// Configuration for the window sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// How often to sweep
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl SweeperConfig {
    /// Create a sweeper config with the specified interval.
    ///
    /// # Errors
    /// Returns `SweeperConfigError::ZeroSweepInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, SweeperConfigError> {
        if interval.is_zero() {
            return Err(SweeperConfigError::ZeroSweepInterval);
        }
        Ok(Self { interval })
    }
}

/// Periodically removes idle rate windows.
pub struct WindowSweeper<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    registry: WindowRegistry<S>,
    config: SweeperConfig,
    metrics: Metrics,
}

impl<S> WindowSweeper<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    /// Create a new sweeper.
    pub fn new(registry: WindowRegistry<S>, config: SweeperConfig, metrics: Metrics) -> Self {
        Self {
            registry,
            config,
            metrics,
        }
    }

    /// Remove windows that are idle now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.registry.clock().now();
        let removed = self.registry.sweep(now);
        for _ in 0..removed {
            self.metrics.record_window_swept();
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = self.registry.len(), "swept idle rate windows");
        }
        removed
    }

    /// Start sweeping periodically on the current tokio runtime.
    ///
    /// The task runs until [`SweeperHandle::shutdown`] is called; dropping the
    /// handle leaves it running.
    #[cfg(feature = "async")]
    pub fn start(self) -> SweeperHandle
    where
        S: Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("window sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }

    /// Get the sweeper configuration.
    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Get a reference to the registry.
    pub fn registry(&self) -> &WindowRegistry<S> {
        &self.registry
    }
}

/// Error returned when the sweeper task did not stop cleanly.
#[cfg(feature = "async")]
#[derive(Debug, Error)]
#[error("window sweeper task failed: {0}")]
pub struct ShutdownError(#[from] tokio::task::JoinError);

/// Handle to a running sweeper task.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[cfg(feature = "async")]
impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        // the receiver is gone only if the task already ended
        let _ = self.shutdown_tx.send(true);
        self.task.await?;
        Ok(())
    }

    /// Whether the sweeper task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

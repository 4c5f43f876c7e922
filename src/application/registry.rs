//! Registry of per-caller rate windows.
//!
//! The registry owns one policy instance per `(caller, endpoint class)` pair.
//! Windows are created lazily from the endpoint's policy (or the default
//! policy) on the first request and removed by the sweeper once idle.

use crate::application::ports::{Clock, Storage, StoreError};
use crate::domain::caller::{EndpointClass, RateKey};
use crate::domain::policy::{Policy, RateLimitPolicy};
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Policy templates per endpoint class.
pub type EndpointPolicies = HashMap<EndpointClass, Policy, RandomState>;

/// Registry managing all rate windows.
///
/// Generic over the storage implementation. In production, use
/// `Arc<ShardedStorage<RateKey, Policy>>`.
#[derive(Clone)]
pub struct WindowRegistry<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    storage: S,
    clock: Arc<dyn Clock>,
    default_policy: Policy,
    endpoint_policies: Arc<EndpointPolicies>,
}

impl<S> WindowRegistry<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    /// Create a registry where every endpoint class uses `default_policy`.
    pub fn new(storage: S, clock: Arc<dyn Clock>, default_policy: Policy) -> Self {
        Self::with_endpoint_policies(storage, clock, default_policy, EndpointPolicies::default())
    }

    /// Create a registry with per-endpoint policy overrides.
    pub fn with_endpoint_policies(
        storage: S,
        clock: Arc<dyn Clock>,
        default_policy: Policy,
        endpoint_policies: EndpointPolicies,
    ) -> Self {
        Self {
            storage,
            clock,
            default_policy,
            endpoint_policies: Arc::new(endpoint_policies),
        }
    }

    /// The policy template applied to new windows of `endpoint`.
    pub fn policy_for(&self, endpoint: &EndpointClass) -> &Policy {
        self.endpoint_policies
            .get(endpoint)
            .unwrap_or(&self.default_policy)
    }

    /// Run `f` on the window of `key`, creating it if necessary.
    ///
    /// Calls for the same key are serialized.
    pub fn with_window<F, R>(&self, key: RateKey, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Policy) -> R,
    {
        let template = self.policy_for(&key.endpoint);
        self.storage.with_entry_mut(key, || template.clone(), f)
    }

    /// Remove every window that is idle at `now`.
    ///
    /// Returns the number of windows removed. Windows in use by an in-flight
    /// request are left for the next sweep.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.storage.retain(|_, policy| {
            let idle = policy.is_idle(now);
            if idle {
                removed += 1;
            }
            !idle
        });
        removed
    }

    /// The clock used for admission timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Get the default policy.
    pub fn default_policy(&self) -> &Policy {
        &self.default_policy
    }

    /// Get the number of tracked windows.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drop all windows.
    pub fn clear(&self) {
        self.storage.clear();
    }
}

impl<S> fmt::Debug for WindowRegistry<S>
where
    S: Storage<RateKey, Policy> + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowRegistry")
            .field("windows", &self.storage.len())
            .field("default_policy", &self.default_policy)
            .field("endpoint_policies", &self.endpoint_policies.len())
            .finish()
    }
}

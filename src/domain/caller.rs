//! Identities used to key rate windows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque caller or session identifier handed over by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId(Arc<str>);

impl CallerId {
    /// Wrap a gateway-supplied identifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Group of routes sharing one budget, e.g. `"documents"` or `"users"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointClass(Arc<str>);

impl EndpointClass {
    /// Name an endpoint class.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The class name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointClass {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Key of one rate window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey {
    /// Who is calling
    pub caller: CallerId,
    /// Which budget the call draws from
    pub endpoint: EndpointClass,
}

impl RateKey {
    /// Pair a caller with an endpoint class.
    pub fn new(caller: CallerId, endpoint: EndpointClass) -> Self {
        Self { caller, endpoint }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.caller, self.endpoint)
    }
}

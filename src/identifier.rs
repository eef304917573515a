//! Proxy session identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique identifier of one engine session.
///
/// Created once when a proxy is constructed and handed to disconnection
/// listeners. Two proxies never share an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyIdentifier(Uuid);

impl ProxyIdentifier {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProxyIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProxyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy-{}", self.0)
    }
}

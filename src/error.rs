//! Error types for engine proxies.
//!
//! Every public proxy operation returns `Result<_, ProxyError>`. The engine
//! collaborator reports its own failures as [`EngineError`], which the proxy
//! passes through unchanged inside [`ProxyError::Invocation`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shorthand for proxy operation results.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// A failure raised by the engine while executing a request.
///
/// The engine ran the request and it failed: bad command, runtime error,
/// wrong argument count. The message is opaque engine detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct EngineError {
    /// Engine-supplied failure message.
    pub message: String,
    /// Engine error identifier (e.g. `Engine:undefinedFunction`), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            identifier: None,
        }
    }

    pub fn with_identifier(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            identifier: Some(identifier.into()),
        }
    }
}

/// A failure of the channel carrying requests to a remote engine.
///
/// Connection refused, broken channel, timeout. Never produced by the
/// engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors returned by proxy operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The proxy has been disconnected. The request never reached a dispatcher.
    #[error("This proxy is no longer connected to the engine")]
    NotConnected,

    /// The engine executed the request and it failed.
    #[error("Engine invocation failed: {0}")]
    Invocation(#[from] EngineError),

    /// The transport failed mid-invocation. The proxy is now permanently disconnected.
    #[error("Connection to the engine was lost: {reason}")]
    ConnectionLost {
        /// Transport-level detail
        reason: String,
    },
}

impl ProxyError {
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        ProxyError::ConnectionLost {
            reason: reason.into(),
        }
    }
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        ProxyError::ConnectionLost { reason: err.0 }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

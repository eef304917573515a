//! Remote strategy: the engine lives in another process.
//!
//! [`RemoteProxy`] serializes each callable and hands it to a [`Transport`].
//! The production transport is [`IpcTransport`], which talks JSON-RPC to an
//! [`EngineServer`](crate::ipc::EngineServer) over a Unix socket. Connection
//! loss is detected from transport errors; an optional heartbeat catches a
//! dead host even when no call is in flight.

mod proxy;
mod transport;

pub use proxy::RemoteProxy;
pub use transport::{FailureHook, IpcTransport, Transport};

//! Proxy for an engine hosted in another process.

use std::sync::{Arc, Weak};

use serde_json::Value;

use super::transport::{IpcTransport, Transport};
use crate::callable::Callable;
use crate::config::RemoteConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::identifier::ProxyIdentifier;
use crate::ipc::IpcError;
use crate::proxy::Proxy;
use crate::state::{ConnectionState, DisconnectionListener};

/// Proxy that forwards every callable over a [`Transport`].
///
/// A transport failure, whether seen by a caller's `send` or reported
/// asynchronously by the transport, disconnects the proxy for good.
pub struct RemoteProxy {
    state: Arc<ConnectionState>,
    transport: Arc<dyn Transport>,
}

impl RemoteProxy {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let state = Arc::new(ConnectionState::new(ProxyIdentifier::new()));

        // Weak: the transport must not keep the proxy state alive.
        let weak: Weak<ConnectionState> = Arc::downgrade(&state);
        transport.on_failure(Box::new(move |err| {
            if let Some(state) = weak.upgrade() {
                if state.disconnect() {
                    tracing::warn!(
                        "Remote proxy {} lost its connection: {}",
                        state.identifier(),
                        err
                    );
                }
            }
        }));

        tracing::info!("Remote proxy {} connected", state.identifier());
        Self { state, transport }
    }

    /// Connect to an engine host over IPC.
    pub fn connect(config: &RemoteConfig) -> Result<Self, IpcError> {
        let transport = IpcTransport::connect(config)?;
        Ok(Self::new(Arc::new(transport)))
    }

    fn connection_lost(&self, reason: String) -> ProxyError {
        if self.state.disconnect() {
            tracing::warn!(
                "Remote proxy {} lost its connection: {}",
                self.state.identifier(),
                reason
            );
            self.transport.close();
        }
        ProxyError::ConnectionLost { reason }
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Proxy for RemoteProxy {
    fn identifier(&self) -> ProxyIdentifier {
        self.state.identifier()
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn disconnect(&self) -> bool {
        let transitioned = self.state.disconnect();
        if transitioned {
            self.transport.close();
        }
        transitioned
    }

    fn add_disconnection_listener(&self, listener: Arc<dyn DisconnectionListener>) {
        self.state.add_listener(listener);
    }

    fn remove_disconnection_listener(&self, listener: &Arc<dyn DisconnectionListener>) -> bool {
        self.state.remove_listener(listener)
    }

    fn invoke_and_wait(&self, callable: Callable) -> ProxyResult<Option<Value>> {
        self.ensure_connected()?;
        tracing::debug!("{} sending {}", self.state.identifier(), callable.kind());

        match self.transport.send(&callable) {
            Ok(outcome) => outcome.map_err(ProxyError::Invocation),
            Err(err) => Err(self.connection_lost(err.0)),
        }
    }

    /// Ask the remote engine to exit.
    ///
    /// The host drops its connections once the engine has exited, so a
    /// connection loss during this call is the expected result, not a failure.
    fn exit(&self) -> ProxyResult<()> {
        self.ensure_connected()?;
        match self.invoke_and_wait(Callable::Exit) {
            Ok(_) => Ok(()),
            Err(ProxyError::ConnectionLost { reason }) => {
                tracing::debug!("Connection dropped while exiting: {}", reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

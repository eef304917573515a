//! Proxy for an engine hosted in this process.
//!
//! The notion of connection exists to match [`RemoteProxy`](crate::remote::RemoteProxy);
//! a local proxy only becomes disconnected when someone calls
//! [`Proxy::disconnect`]. Asking the engine to exit does not disconnect it.

use std::sync::Arc;

use serde_json::Value;

use crate::callable::Callable;
use crate::engine::{Engine, EngineExecutor};
use crate::error::{ProxyError, ProxyResult};
use crate::identifier::ProxyIdentifier;
use crate::proxy::Proxy;
use crate::state::{ConnectionState, DisconnectionListener};

/// Proxy that dispatches directly onto an in-process engine thread.
#[derive(Debug)]
pub struct LocalProxy {
    state: ConnectionState,
    executor: EngineExecutor,
}

impl LocalProxy {
    /// Wrap an existing engine thread.
    pub fn new(executor: EngineExecutor) -> Self {
        let state = ConnectionState::new(ProxyIdentifier::new());
        tracing::info!("Local proxy {} connected", state.identifier());
        Self { state, executor }
    }

    /// Start a dedicated thread for `engine` and connect to it.
    pub fn spawn<E: Engine>(engine: E) -> std::io::Result<Self> {
        Ok(Self::new(EngineExecutor::spawn(engine)?))
    }

    pub fn executor(&self) -> &EngineExecutor {
        &self.executor
    }
}

impl Proxy for LocalProxy {
    fn identifier(&self) -> ProxyIdentifier {
        self.state.identifier()
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn disconnect(&self) -> bool {
        self.state.disconnect()
    }

    fn add_disconnection_listener(&self, listener: Arc<dyn DisconnectionListener>) {
        self.state.add_listener(listener);
    }

    fn remove_disconnection_listener(&self, listener: &Arc<dyn DisconnectionListener>) -> bool {
        self.state.remove_listener(listener)
    }

    fn invoke_and_wait(&self, callable: Callable) -> ProxyResult<Option<Value>> {
        self.ensure_connected()?;
        tracing::debug!("{} dispatching {}", self.state.identifier(), callable.kind());
        self.executor
            .run_on_engine_thread(callable)
            .map_err(ProxyError::Invocation)
    }

    fn exit(&self) -> ProxyResult<()> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::Exit).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScratchEngine;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_proxy() -> LocalProxy {
        LocalProxy::spawn(ScratchEngine::new()).unwrap()
    }

    #[test]
    fn test_eval_then_disconnect() {
        let proxy = scratch_proxy();
        assert_eq!(proxy.eval("x = 2"), Ok(()));

        assert!(proxy.disconnect());
        assert!(!proxy.is_connected());
        assert_eq!(proxy.eval("x = 2"), Err(ProxyError::NotConnected));
        assert!(!proxy.disconnect());
    }

    #[test]
    fn test_engine_failure_is_typed() {
        let proxy = scratch_proxy();
        let err = proxy.returning_eval("undefinedThing", 1).unwrap_err();
        match err {
            ProxyError::Invocation(e) => {
                assert_eq!(e.identifier.as_deref(), Some("Engine:undefinedVariable"));
            }
            other => panic!("Expected Invocation, got {other:?}"),
        }
        // Engine failures do not affect the connection.
        assert!(proxy.is_connected());
    }

    #[test]
    fn test_variable_round_trip() {
        let proxy = scratch_proxy();
        let value = json!({"a": [1, 2, 3], "b": "text"});
        proxy.set_variable("v", value.clone()).unwrap();
        assert_eq!(proxy.get_variable("v").unwrap(), value);
    }

    #[test]
    fn test_exit_does_not_disconnect() {
        let proxy = scratch_proxy();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        proxy.add_disconnection_listener(Arc::new(move |_: &ProxyIdentifier| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        proxy.exit().unwrap();
        assert!(proxy.is_connected());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // The engine is gone, so further work fails on the engine side.
        assert!(matches!(proxy.eval("x = 1"), Err(ProxyError::Invocation(_))));
    }

    #[test]
    fn test_exit_after_disconnect_fails() {
        let proxy = scratch_proxy();
        proxy.disconnect();
        assert_eq!(proxy.exit(), Err(ProxyError::NotConnected));
    }

    #[test]
    fn test_proxies_sharing_an_executor_have_distinct_identifiers() {
        let executor = EngineExecutor::spawn(ScratchEngine::new()).unwrap();
        let first = LocalProxy::new(executor.clone());
        let second = LocalProxy::new(executor);
        assert_ne!(first.identifier(), second.identifier());

        first.set_variable("shared", json!(7)).unwrap();
        assert_eq!(second.get_variable("shared").unwrap(), json!(7));

        first.disconnect();
        assert!(second.is_connected());
    }
}

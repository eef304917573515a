//! The caller-facing operation surface shared by every proxy.
//!
//! Implementors supply connection bookkeeping plus [`Proxy::invoke_and_wait`];
//! the eval/feval/variable operations are provided on top of it. Each
//! provided operation checks the connection first and fails with
//! [`ProxyError::NotConnected`] before building a [`Callable`].

use std::sync::Arc;

use serde_json::Value;

use crate::callable::Callable;
use crate::error::{ProxyError, ProxyResult};
use crate::identifier::ProxyIdentifier;
use crate::state::DisconnectionListener;

/// Synchronous access to one engine session, local or remote.
///
/// Safe to share between threads. Concurrent calls are serialized by the
/// engine itself; every caller receives only its own result.
pub trait Proxy: Send + Sync {
    /// Identifier of the session behind this proxy.
    fn identifier(&self) -> ProxyIdentifier;

    /// Whether operations can still be issued. Never blocks.
    fn is_connected(&self) -> bool;

    /// Permanently disconnect this proxy.
    ///
    /// Returns `true` only for the call that performed the transition.
    fn disconnect(&self) -> bool;

    fn add_disconnection_listener(&self, listener: Arc<dyn DisconnectionListener>);

    /// Returns whether the listener was registered.
    fn remove_disconnection_listener(&self, listener: &Arc<dyn DisconnectionListener>) -> bool;

    /// Run `callable` on the engine thread and wait for its outcome.
    fn invoke_and_wait(&self, callable: Callable) -> ProxyResult<Option<Value>>;

    /// Ask the engine to terminate.
    fn exit(&self) -> ProxyResult<()>;

    /// Fails with `NotConnected` once the proxy is disconnected.
    fn ensure_connected(&self) -> ProxyResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ProxyError::NotConnected)
        }
    }

    /// Evaluate `command`, discarding any result.
    fn eval(&self, command: &str) -> ProxyResult<()> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::eval(command)).map(drop)
    }

    /// Evaluate `command` and return `return_count` values.
    ///
    /// A count of zero is valid and yields `Value::Null`.
    fn returning_eval(&self, command: &str, return_count: usize) -> ProxyResult<Value> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::returning_eval(command, return_count))
            .map(Option::unwrap_or_default)
    }

    /// Call `function` for its side effects.
    fn feval(&self, function: &str, args: Vec<Value>) -> ProxyResult<()> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::feval(function, args)).map(drop)
    }

    /// Call `function` with the engine's default output count.
    fn returning_feval(&self, function: &str, args: Vec<Value>) -> ProxyResult<Value> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::returning_feval(function, args))
            .map(Option::unwrap_or_default)
    }

    /// Call `function` requesting exactly `return_count` outputs.
    ///
    /// Not interchangeable with [`Proxy::returning_feval`]: a function whose
    /// natural output count differs from `return_count` returns a different
    /// shape.
    fn returning_feval_with_count(
        &self,
        function: &str,
        args: Vec<Value>,
        return_count: usize,
    ) -> ProxyResult<Value> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::returning_feval_with_count(
            function,
            args,
            return_count,
        ))
        .map(Option::unwrap_or_default)
    }

    /// Assign `value` to `name` in the engine workspace.
    fn set_variable(&self, name: &str, value: Value) -> ProxyResult<()> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::set_variable(name, value))
            .map(drop)
    }

    /// Read `name` from the engine workspace.
    fn get_variable(&self, name: &str) -> ProxyResult<Value> {
        self.ensure_connected()?;
        self.invoke_and_wait(Callable::get_variable(name))
            .map(Option::unwrap_or_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    // Records every callable that reaches dispatch.
    struct RecordingProxy {
        state: ConnectionState,
        dispatched: Mutex<Vec<Callable>>,
    }

    impl RecordingProxy {
        fn new() -> Self {
            Self {
                state: ConnectionState::new(ProxyIdentifier::new()),
                dispatched: Mutex::new(Vec::new()),
            }
        }
    }

    impl Proxy for RecordingProxy {
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
            self.state.add_listener(listener)
        }

        fn remove_disconnection_listener(&self, listener: &Arc<dyn DisconnectionListener>) -> bool {
            self.state.remove_listener(listener)
        }

        fn invoke_and_wait(&self, callable: Callable) -> ProxyResult<Option<Value>> {
            self.ensure_connected()?;
            let reply = match &callable {
                Callable::Eval { .. } | Callable::Feval { .. } => Some(json!("ok")),
                _ => None,
            };
            self.dispatched.lock().unwrap().push(callable);
            Ok(reply)
        }

        fn exit(&self) -> ProxyResult<()> {
            self.invoke_and_wait(Callable::Exit).map(drop)
        }
    }

    #[test]
    fn test_operations_build_expected_callables() {
        let proxy = RecordingProxy::new();
        proxy.eval("a = 1").unwrap();
        proxy.returning_eval("a", 1).unwrap();
        proxy.feval("disp", vec![json!(1)]).unwrap();
        proxy.returning_feval("size", vec![]).unwrap();
        proxy.returning_feval_with_count("size", vec![], 2).unwrap();
        proxy.set_variable("v", json!(3)).unwrap();
        proxy.get_variable("v").unwrap();

        assert_eq!(
            *proxy.dispatched.lock().unwrap(),
            vec![
                Callable::eval("a = 1"),
                Callable::returning_eval("a", 1),
                Callable::feval("disp", vec![json!(1)]),
                Callable::returning_feval("size", vec![]),
                Callable::returning_feval_with_count("size", vec![], 2),
                Callable::set_variable("v", json!(3)),
                Callable::get_variable("v"),
            ]
        );
    }

    #[test]
    fn test_missing_value_becomes_null() {
        let proxy = RecordingProxy::new();
        assert_eq!(proxy.get_variable("x").unwrap(), Value::Null);
    }

    #[test]
    fn test_disconnected_proxy_dispatches_nothing() {
        let proxy = RecordingProxy::new();
        assert!(proxy.disconnect());

        assert_eq!(proxy.eval("1+1"), Err(ProxyError::NotConnected));
        assert_eq!(proxy.returning_eval("1+1", 1), Err(ProxyError::NotConnected));
        assert_eq!(proxy.feval("f", vec![]), Err(ProxyError::NotConnected));
        assert_eq!(proxy.returning_feval("f", vec![]), Err(ProxyError::NotConnected));
        assert_eq!(
            proxy.returning_feval_with_count("f", vec![], 1),
            Err(ProxyError::NotConnected)
        );
        assert_eq!(proxy.set_variable("x", json!(1)), Err(ProxyError::NotConnected));
        assert_eq!(proxy.get_variable("x"), Err(ProxyError::NotConnected));
        assert_eq!(proxy.exit(), Err(ProxyError::NotConnected));

        assert!(proxy.dispatched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_usable_as_trait_object() {
        let proxy: Arc<dyn Proxy> = Arc::new(RecordingProxy::new());
        assert!(proxy.is_connected());
        proxy.eval("x").unwrap();
    }
}

//! Transports carrying callables to an engine in another process.

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::callable::Callable;
use crate::config::RemoteConfig;
use crate::engine::EngineOutcome;
use crate::error::{EngineError, TransportError};
use crate::ipc::protocol::{InvokeResult, ENGINE_FAILURE, METHOD_INVOKE};
use crate::ipc::{heartbeat, IpcClient, IpcError};

/// Called once with the reason when a transport notices it has failed.
pub type FailureHook = Box<dyn FnOnce(TransportError) + Send>;

/// A channel to a remote engine thread.
///
/// `send` blocks the calling thread until the remote engine has answered,
/// the transport has failed, or its timeout policy gave up.
pub trait Transport: Send + Sync {
    /// Deliver `callable` and wait for the engine's outcome.
    ///
    /// The outer error means the channel failed and the engine's outcome is
    /// unknown; the inner one is an engine-side failure.
    fn send(&self, callable: &Callable) -> Result<EngineOutcome, TransportError>;

    /// Subscribe to asynchronous failure notification.
    ///
    /// Transports without one rely on `send` errors alone.
    fn on_failure(&self, hook: FailureHook) {
        drop(hook);
    }

    /// Release the channel. Pending and later sends fail.
    fn close(&self) {}
}

/// [`Transport`] over the JSON-RPC [`IpcClient`].
///
/// Owns a small Tokio runtime so synchronous callers on any thread can
/// drive the async client. Must not be used from inside another runtime's
/// async context.
pub struct IpcTransport {
    runtime: Runtime,
    client: Arc<IpcClient>,
}

impl IpcTransport {
    /// Connect according to `config`, retrying with backoff.
    pub fn connect(config: &RemoteConfig) -> Result<Self, IpcError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("engine-proxy-ipc")
            .enable_all()
            .build()
            .map_err(IpcError::Io)?;

        let mut client = runtime.block_on(IpcClient::connect_with_retry(
            &config.socket_path,
            config.connect_attempts,
        ))?;
        client.set_timeout(config.request_timeout);
        let client = Arc::new(client);

        if let Some(interval) = config.heartbeat_interval {
            tracing::debug!("Heartbeat every {:?}", interval);
            runtime.spawn(heartbeat(Arc::clone(&client), interval));
        }

        Ok(Self { runtime, client })
    }

    pub fn client(&self) -> &Arc<IpcClient> {
        &self.client
    }
}

impl Transport for IpcTransport {
    fn send(&self, callable: &Callable) -> Result<EngineOutcome, TransportError> {
        let params = serde_json::to_value(callable)
            .map_err(|e| TransportError::new(format!("Failed to encode callable: {}", e)))?;

        let reply = self
            .runtime
            .block_on(self.client.call(METHOD_INVOKE, params));

        match reply {
            Ok(result) => {
                let result: InvokeResult = serde_json::from_value(result).map_err(|e| {
                    TransportError::new(format!("Malformed invoke result: {}", e))
                })?;
                Ok(Ok(result.value))
            }
            Err(err) => classify(err),
        }
    }

    fn on_failure(&self, hook: FailureHook) {
        self.client
            .on_close(Box::new(move |reason| hook(TransportError::new(reason))));
    }

    fn close(&self) {
        let client = Arc::clone(&self.client);
        // Spawned rather than blocked on, so closing works from any thread.
        self.runtime.spawn(async move { client.shutdown().await });
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Split host errors into engine failures and channel failures.
///
/// Any JSON-RPC error response proves the host received and answered the
/// request, so it is an engine-side outcome. An oversized request never left
/// this process and fails the same way. Everything else leaves the outcome
/// unknown.
fn classify(err: IpcError) -> Result<EngineOutcome, TransportError> {
    match err {
        IpcError::ServerError {
            code,
            message,
            data,
        } => {
            let engine_err = if code == ENGINE_FAILURE {
                data.and_then(|d| serde_json::from_value::<EngineError>(d).ok())
                    .unwrap_or_else(|| EngineError::new(message))
            } else {
                EngineError::with_identifier(
                    "EngineProxy:rejected",
                    format!("Engine host rejected the request ({}): {}", code, message),
                )
            };
            Ok(Err(engine_err))
        }
        IpcError::MessageTooLarge { size, limit } => Ok(Err(EngineError::with_identifier(
            "EngineProxy:rejected",
            format!(
                "Request of {} bytes exceeds the {} byte message limit",
                size, limit
            ),
        ))),
        other => Err(TransportError::new(other.to_string())),
    }
}

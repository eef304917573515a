//! IPC client for JSON-RPC 2.0 communication with an engine host.
//!
//! `IpcClient` holds one Unix socket connection and lets many requests be in
//! flight at once. Each request gets a fresh id; a background reader task
//! routes every response to the caller waiting on that id. When the
//! connection breaks, every waiting caller is failed and the registered
//! close hooks run once.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::ipc::framing::{read_message, write_message, MAX_MESSAGE_SIZE};
use crate::ipc::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, METHOD_PING};

/// Lower bound on how long a heartbeat waits for its pong.
const MIN_PING_DEADLINE: Duration = Duration::from_secs(1);

/// IPC-specific error types.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to connect to the host socket.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// Request timed out waiting for response.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol-level error (framing, encoding).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The encoded request exceeds the frame limit. Nothing was sent.
    #[error("Request of {size} bytes exceeds the {limit} byte message limit")]
    MessageTooLarge {
        size: usize,
        limit: usize,
    },

    /// Host returned a JSON-RPC error response.
    #[error("Server error {code}: {message}")]
    ServerError {
        /// JSON-RPC error code
        code: i32,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },

    /// The connection is gone; no further requests can be sent.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                IpcError::ConnectionFailed(err)
            }
            _ => IpcError::Io(err),
        }
    }
}

impl From<JsonRpcError> for IpcError {
    fn from(err: JsonRpcError) -> Self {
        IpcError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Called once with the reason when the connection closes.
pub type CloseHook = Box<dyn FnOnce(&str) + Send>;

type Waiter = oneshot::Sender<Result<JsonRpcResponse, IpcError>>;

#[derive(Default)]
struct Pending {
    /// Set once; the reason the connection closed.
    closed: Option<String>,
    waiters: HashMap<u64, Waiter>,
    hooks: Vec<CloseHook>,
}

/// State shared between the client and its reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(
        &self,
        id: u64,
    ) -> Result<oneshot::Receiver<Result<JsonRpcResponse, IpcError>>, IpcError> {
        let mut pending = self.lock();
        if let Some(reason) = &pending.closed {
            return Err(IpcError::Closed(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Ok(rx)
    }

    fn forget(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    fn deliver(&self, id: u64, response: JsonRpcResponse) {
        match self.lock().waiters.remove(&id) {
            Some(waiter) => {
                // The caller may have timed out and gone; that's fine.
                let _ = waiter.send(Ok(response));
            }
            None => tracing::debug!("Discarding response for unknown request id {}", id),
        }
    }

    /// Close the connection state. Only the first call has any effect.
    fn close(&self, reason: &str) {
        let (waiters, hooks) = {
            let mut pending = self.lock();
            if pending.closed.is_some() {
                return;
            }
            pending.closed = Some(reason.to_string());
            (
                std::mem::take(&mut pending.waiters),
                std::mem::take(&mut pending.hooks),
            )
        };

        tracing::warn!(
            "IPC connection closed ({} request(s) in flight): {}",
            waiters.len(),
            reason
        );

        for (_, waiter) in waiters {
            let _ = waiter.send(Err(IpcError::Closed(reason.to_string())));
        }
        for hook in hooks {
            hook(reason);
        }
    }

    fn on_close(&self, hook: CloseHook) {
        let mut pending = self.lock();
        let closed = pending.closed.clone();
        match closed {
            Some(reason) => {
                drop(pending);
                hook(&reason);
            }
            None => pending.hooks.push(hook),
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }
}

/// IPC client for communication with an engine host.
///
/// # Connection Lifecycle
///
/// - `connect()` - Establish initial connection
/// - `connect_with_retry()` - Retry connection with exponential backoff
/// - `call()` - Send request and wait for response (optional timeout)
/// - `shutdown()` - Close the connection; pending calls fail
///
/// # Example
///
/// ```ignore
/// use engine_proxy::ipc::IpcClient;
/// use serde_json::json;
///
/// let client = IpcClient::connect(Path::new("/tmp/engine-proxy.sock")).await?;
/// let pong = client.call("system.ping", json!({})).await?;
/// ```
pub struct IpcClient {
    /// Writer for outgoing messages; `None` once shut down.
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    shared: Arc<Shared>,
    /// Monotonically increasing request ID counter.
    request_id: AtomicU64,
    /// Request timeout; `None` waits for as long as the host takes.
    timeout: Option<Duration>,
    reader_task: JoinHandle<()>,
}

impl IpcClient {
    /// Connect to the engine host at the given socket path.
    ///
    /// Must be called from within a Tokio runtime; the response reader runs
    /// as a task on it.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::ConnectionFailed` if:
    /// - The socket file does not exist
    /// - Connection is refused (host not running)
    /// - Permission denied
    pub async fn connect(socket_path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(IpcError::ConnectionFailed)?;

        tracing::info!("Connected to engine host at {}", socket_path.display());
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared::default());
        let reader_task = tokio::spawn(read_loop(BufReader::new(read_half), Arc::clone(&shared)));

        Self {
            writer: tokio::sync::Mutex::new(Some(write_half)),
            shared,
            request_id: AtomicU64::new(1),
            timeout: None,
            reader_task,
        }
    }

    /// Connect with automatic retry and exponential backoff.
    ///
    /// Useful when the host may still be starting up. Retries with delays of
    /// 100ms, 200ms, 400ms, etc. Zero attempts is treated as one.
    ///
    /// # Errors
    ///
    /// Returns the last connection error if all attempts fail.
    pub async fn connect_with_retry(
        socket_path: &Path,
        max_attempts: u32,
    ) -> Result<Self, IpcError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match Self::connect(socket_path).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(10)));
                    tracing::debug!(
                        "Connect attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Set the request timeout.
    ///
    /// Default is `None`: engine commands may legitimately run for a long
    /// time, and a dead host is noticed through the socket or a heartbeat.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Register a hook that runs once when the connection closes.
    ///
    /// Runs immediately if the connection is already closed.
    pub fn on_close(&self, hook: CloseHook) {
        self.shared.on_close(hook);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Send a JSON-RPC 2.0 request and wait for the response.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Encoded request is over the frame limit (`IpcError::MessageTooLarge`)
    /// - Request times out (`IpcError::Timeout`)
    /// - Connection is lost (`IpcError::Closed`)
    /// - Host returns error (`IpcError::ServerError`)
    /// - Protocol error (`IpcError::Protocol`)
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, IpcError> {
        let id = self.next_id();
        let request = JsonRpcRequest::new(method, params, id);
        let request_json = serde_json::to_string(&request)
            .map_err(|e| IpcError::Protocol(format!("Failed to serialize request: {}", e)))?;

        // The host drops a connection that sends an oversized frame.
        if request_json.len() > MAX_MESSAGE_SIZE {
            return Err(IpcError::MessageTooLarge {
                size: request_json.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }

        let response_rx = self.shared.register(id)?;
        let exchange = self.send_receive(&request_json, response_rx);

        // Apply timeout to the entire send/receive operation
        let result = match self.timeout {
            Some(limit) => match timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => Err(IpcError::Timeout(limit)),
            },
            None => exchange.await,
        };

        match result {
            Ok(response) => process_response(response),
            Err(e) => {
                self.shared.forget(id);
                Err(e)
            }
        }
    }

    /// Close the connection. Pending and future calls fail with `Closed`.
    pub async fn shutdown(&self) {
        self.shared.close("Client shut down");
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Error shutting down IPC writer: {}", e);
            }
        }
        self.reader_task.abort();
    }

    /// Generate the next request ID.
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Write one request and wait for the reader task to route its response.
    async fn send_receive(
        &self,
        request_json: &str,
        response_rx: oneshot::Receiver<Result<JsonRpcResponse, IpcError>>,
    ) -> Result<JsonRpcResponse, IpcError> {
        {
            let mut writer = self.writer.lock().await;
            let writer = writer
                .as_mut()
                .ok_or_else(|| IpcError::Closed("Client shut down".to_string()))?;

            if let Err(e) = write_message(writer, request_json).await {
                let reason = format!("Failed to send request: {:#}", e);
                self.shared.close(&reason);
                return Err(IpcError::Closed(reason));
            }
        }

        response_rx
            .await
            .map_err(|_| IpcError::Closed("Response reader stopped".to_string()))?
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Process a JSON-RPC response, extracting result or error.
fn process_response(response: JsonRpcResponse) -> Result<serde_json::Value, IpcError> {
    if let Some(err) = response.error {
        return Err(err.into());
    }

    response
        .result
        .ok_or_else(|| IpcError::Protocol("Response missing both result and error".to_string()))
}

/// Route responses to waiting callers until the connection ends.
async fn read_loop(mut reader: BufReader<OwnedReadHalf>, shared: Arc<Shared>) {
    let reason = loop {
        let body = match read_message(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break "Connection closed by engine host".to_string(),
            Err(e) => break format!("Failed to read response: {:#}", e),
        };

        let response: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(e) => break format!("Failed to parse response: {}", e),
        };

        match response.id {
            Some(id) => shared.deliver(id, response),
            // The host could not even read our request id; the stream is no
            // longer trustworthy.
            None => {
                let detail = response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "response without id".to_string());
                break format!("Host rejected a request: {}", detail);
            }
        }
    };

    shared.close(&reason);
}

/// Ping the host with `system.ping` every `interval` until the connection
/// closes. A failed or unanswered ping closes the connection.
///
/// The host answers pings without going through the engine, so a long
/// running engine command does not look like a dead host.
pub async fn heartbeat(client: Arc<IpcClient>, interval: Duration) {
    let deadline = (interval * 3).max(MIN_PING_DEADLINE);
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if client.is_closed() {
            break;
        }
        let ping = timeout(deadline, client.call(METHOD_PING, serde_json::json!({})));
        match ping.await.unwrap_or(Err(IpcError::Timeout(deadline))) {
            Ok(_) | Err(IpcError::ServerError { .. }) => {}
            Err(e) => {
                client.shared.close(&format!("Heartbeat failed: {}", e));
                break;
            }
        }
    }
}

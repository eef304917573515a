//! Engine host: the receiving end of the remote strategy.
//!
//! `EngineServer` accepts client connections on a Unix socket, decodes each
//! `engine.invoke` request into a [`Callable`] and runs it through the local
//! [`EngineExecutor`], so remote calls reach the same single engine thread as
//! local ones. Requests on one connection are handled concurrently; the
//! engine thread serializes them.
//!
//! After a successful `exit` request the server stops accepting, drops all
//! connections and [`EngineServer::serve`] returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex};

use crate::callable::Callable;
use crate::engine::EngineExecutor;
use crate::ipc::framing::{read_message, write_message};
use crate::ipc::protocol::{
    InvokeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ENGINE_FAILURE,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_INVOKE, METHOD_NOT_FOUND, METHOD_PING, PARSE_ERROR,
};

const INTERNAL_ERROR: i32 = -32603;

/// Serves one engine over a Unix socket.
pub struct EngineServer {
    listener: UnixListener,
    executor: EngineExecutor,
    /// Socket file to remove once serving ends.
    socket_path: Option<PathBuf>,
}

impl EngineServer {
    /// Bind `socket_path`, replacing a stale socket file if one exists.
    pub fn bind(socket_path: &Path, executor: EngineExecutor) -> std::io::Result<Self> {
        if socket_path.exists() {
            tracing::debug!("Removing stale socket {}", socket_path.display());
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        tracing::info!("Engine host listening on {}", socket_path.display());

        Ok(Self {
            listener,
            executor,
            socket_path: Some(socket_path.to_path_buf()),
        })
    }

    pub fn from_listener(listener: UnixListener, executor: EngineExecutor) -> Self {
        Self {
            listener,
            executor,
            socket_path: None,
        }
    }

    /// Accept and serve connections until the engine is asked to exit.
    pub async fn serve(self) -> std::io::Result<()> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let result = loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::info!("Engine host accepted a client");
                        tokio::spawn(serve_connection(
                            stream,
                            self.executor.clone(),
                            Arc::clone(&shutdown_tx),
                        ));
                    }
                    Err(e) => break Err(e),
                },
                _ = shutdown_rx.changed() => break Ok(()),
            }
        };

        if let Some(path) = &self.socket_path {
            let _ = std::fs::remove_file(path);
        }
        tracing::info!("Engine host stopped");
        result
    }
}

async fn serve_connection(
    stream: UnixStream,
    executor: EngineExecutor,
    shutdown_tx: Arc<watch::Sender<bool>>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(Mutex::new(write_half));
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        let body = tokio::select! {
            message = read_message(&mut reader) => match message {
                Ok(Some(body)) => body,
                Ok(None) => {
                    tracing::info!("Client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Dropping client after read failure: {:#}", e);
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        };

        let executor = executor.clone();
        let writer = Arc::clone(&writer);
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            let (response, exited) = handle_message(&body, executor).await;
            if let Err(e) = send_response(&writer, &response).await {
                tracing::warn!("Failed to send response: {:#}", e);
            }
            if exited {
                let _ = shutdown_tx.send(true);
            }
        });
    }
}

async fn send_response(
    writer: &Mutex<OwnedWriteHalf>,
    response: &JsonRpcResponse,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(response)?;
    let mut writer = writer.lock().await;
    write_message(&mut *writer, &json).await
}

/// Decode one request and produce its response. The flag reports a
/// successful engine exit.
async fn handle_message(body: &str, executor: EngineExecutor) -> (JsonRpcResponse, bool) {
    let raw: Value = match serde_json::from_str(body) {
        Ok(raw) => raw,
        Err(e) => {
            return (
                JsonRpcResponse::failure(None, JsonRpcError::new(PARSE_ERROR, e.to_string())),
                false,
            )
        }
    };

    let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
        Ok(request) => request,
        Err(e) => {
            let id = raw.get("id").and_then(Value::as_u64);
            return (
                JsonRpcResponse::failure(id, JsonRpcError::new(INVALID_REQUEST, e.to_string())),
                false,
            );
        }
    };

    let id = request.id;
    match request.method.as_str() {
        METHOD_PING => (JsonRpcResponse::success(id, json!({"pong": true})), false),
        METHOD_INVOKE => invoke(id, request.params, executor).await,
        other => (
            JsonRpcResponse::failure(
                Some(id),
                JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", other)),
            ),
            false,
        ),
    }
}

async fn invoke(id: u64, params: Value, executor: EngineExecutor) -> (JsonRpcResponse, bool) {
    let callable: Callable = match serde_json::from_value(params) {
        Ok(callable) => callable,
        Err(e) => {
            return (
                JsonRpcResponse::failure(
                    Some(id),
                    JsonRpcError::new(INVALID_PARAMS, format!("Invalid callable: {}", e)),
                ),
                false,
            )
        }
    };

    let is_exit = matches!(callable, Callable::Exit);
    tracing::debug!("Request {} invoking {}", id, callable.kind());

    // The executor blocks until the engine thread answers.
    let outcome =
        tokio::task::spawn_blocking(move || executor.run_on_engine_thread(callable)).await;

    match outcome {
        Ok(Ok(value)) => {
            let result = serde_json::to_value(InvokeResult { value }).unwrap_or(Value::Null);
            (JsonRpcResponse::success(id, result), is_exit)
        }
        Ok(Err(engine_err)) => {
            let mut error = JsonRpcError::new(ENGINE_FAILURE, engine_err.message.clone());
            error.data = serde_json::to_value(&engine_err).ok();
            (JsonRpcResponse::failure(Some(id), error), false)
        }
        Err(join_err) => (
            JsonRpcResponse::failure(
                Some(id),
                JsonRpcError::new(INTERNAL_ERROR, format!("Engine dispatch failed: {}", join_err)),
            ),
            false,
        ),
    }
}

//! Engine host - serves a single engine to remote proxies.
//!
//! Usage: `engine-host [SOCKET_PATH]`
//!
//! Without an argument the socket path comes from `ENGINE_PROXY_SOCKET` or
//! the platform default. The host exits once a client asks the engine to exit.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engine_proxy::engine::{EngineExecutor, ScratchEngine};
use engine_proxy::ipc::EngineServer;
use engine_proxy::RemoteConfig;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "engine_proxy=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!("Starting engine host v{}", env!("CARGO_PKG_VERSION"));

    let socket_path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            RemoteConfig::from_env()
                .context("Invalid engine proxy configuration")?
                .socket_path
        }
    };

    let executor =
        EngineExecutor::spawn(ScratchEngine::new()).context("Failed to start engine thread")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async {
        let server = EngineServer::bind(&socket_path, executor)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

        tokio::select! {
            served = server.serve() => served.context("Engine host failed"),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                let _ = std::fs::remove_file(&socket_path);
                Ok(())
            }
        }
    })?;

    tracing::info!("Engine host exited cleanly");
    Ok(())
}

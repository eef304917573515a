//! Engine Proxy Library
//!
//! Synchronous, thread-safe access to a numerical engine that may only be
//! touched from one thread:
//!
//! - `proxy` - the [`Proxy`] trait every strategy implements
//! - `local` - engine running on a dedicated thread in this process
//! - `remote` - engine hosted by another process, reached over IPC
//! - `engine` - the [`Engine`] trait, its executor and a reference engine
//! - `ipc` - JSON-RPC client, server and framing used by the remote strategy
//! - `state` - connection lifecycle and disconnection listeners
//!
//! # Example
//!
//! ```ignore
//! use engine_proxy::{LocalProxy, Proxy, ScratchEngine};
//! use serde_json::json;
//!
//! let proxy = LocalProxy::spawn(ScratchEngine::new())?;
//! proxy.set_variable("x", json!([1, 2, 3]))?;
//! let bounds = proxy.returning_feval_with_count("minmax", vec![json!([4, 9])], 2)?;
//! proxy.disconnect();
//! ```

pub mod callable;
pub mod config;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod ipc;
pub mod local;
pub mod proxy;
pub mod remote;
pub mod state;

pub use callable::{Callable, Returns};
pub use config::RemoteConfig;
pub use engine::{Engine, EngineExecutor, ScratchEngine};
pub use error::{EngineError, ProxyError, ProxyResult};
pub use identifier::ProxyIdentifier;
pub use local::LocalProxy;
pub use proxy::Proxy;
pub use remote::RemoteProxy;
pub use state::DisconnectionListener;

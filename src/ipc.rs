//! IPC between a controlling process and an engine host.
//!
//! The remote strategy crosses the process boundary over Unix domain
//! sockets using JSON-RPC 2.0:
//!
//! ```text
//! ┌─────────────────┐         Unix Socket          ┌─────────────────────┐
//! │  RemoteProxy    │  ◄──────────────────────────►│    EngineServer     │
//! │  (IpcClient)    │    JSON-RPC 2.0 + framing    │  (EngineExecutor)   │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing (same as LSP):
//!
//! ```text
//! Content-Length: 59\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"system.ping","params":{},"id":1}
//! ```

mod client;
mod framing;
pub mod protocol;
mod server;

pub use client::{heartbeat, CloseHook, IpcClient, IpcError};
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
pub use server::EngineServer;

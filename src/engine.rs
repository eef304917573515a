//! The engine collaborator and its dedicated execution thread.
//!
//! An [`Engine`] performs a single evaluate/call against the embedded
//! numerical engine. It is single threaded by nature, so it is never shared:
//! [`EngineExecutor`] moves it onto one worker thread and every request is
//! delivered to that thread over a channel.
//!
//! ```text
//! ┌──────────────┐   Job::Run    ┌──────────────────────┐
//! │ caller A     │ ────────────► │ engine worker thread │
//! │ caller B     │ ────────────► │   owns Box<Engine>   │
//! │   ...        │ ◄──────────── │   one job at a time  │
//! └──────────────┘  reply chan   └──────────────────────┘
//! ```

mod executor;
mod scratch;

pub use executor::EngineExecutor;
pub use scratch::{EngineFunction, ScratchEngine};

use serde_json::Value;

use crate::callable::Callable;
use crate::error::EngineError;

/// What the engine hands back for one request: a value, no value, or an
/// engine-side failure.
pub type EngineOutcome = Result<Option<Value>, EngineError>;

/// The primitive that executes one request against the embedded engine.
///
/// Implementations are driven from exactly one thread and never concurrently.
pub trait Engine: Send + 'static {
    fn run(&mut self, callable: &Callable) -> EngineOutcome;
}

impl<F> Engine for F
where
    F: FnMut(&Callable) -> EngineOutcome + Send + 'static,
{
    fn run(&mut self, callable: &Callable) -> EngineOutcome {
        self(callable)
    }
}

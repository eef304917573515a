//! Dedicated engine thread.
//!
//! `EngineExecutor` spawns one worker thread that owns the engine and
//! processes jobs from a bounded channel. Callers block on a per-call reply
//! channel, so each caller only ever sees its own result.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::{Engine, EngineOutcome};
use crate::callable::Callable;
use crate::error::{panic_message, EngineError};

/// Maximum number of queued jobs before callers block.
const CHANNEL_BOUND: usize = 64;

enum Job {
    /// Graceful shutdown signal - worker exits after receiving this.
    Shutdown,
    Run {
        callable: Callable,
        reply: SyncSender<EngineOutcome>,
    },
}

/// Handle to the engine's execution thread.
///
/// Cheap to clone; all clones feed the same worker. When the last clone is
/// dropped the worker is asked to shut down.
#[derive(Clone)]
pub struct EngineExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    request_tx: SyncSender<Job>,
    engine_thread: ThreadId,
    /// Handle to the worker thread for graceful shutdown.
    worker_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EngineExecutor {
    /// Move `engine` onto a new worker thread.
    pub fn spawn<E: Engine>(engine: E) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::sync_channel::<Job>(CHANNEL_BOUND);

        let worker_handle = thread::Builder::new()
            .name("engine-worker".to_string())
            .spawn(move || engine_worker_loop(engine, request_rx))?;
        let engine_thread = worker_handle.thread().id();

        tracing::debug!("Spawned engine worker thread {:?}", engine_thread);

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                request_tx,
                engine_thread,
                worker_handle: Mutex::new(Some(worker_handle)),
            }),
        })
    }

    /// Run `callable` on the engine thread and block until it finishes.
    pub fn run_on_engine_thread(&self, callable: Callable) -> EngineOutcome {
        // The worker is busy running the job that called us; queueing behind
        // it would never complete.
        if self.is_engine_thread() {
            return Err(EngineError::with_identifier(
                "EngineProxy:reentrant",
                "Cannot invoke the engine from its own execution thread",
            ));
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel::<EngineOutcome>(1);
        self.inner
            .request_tx
            .send(Job::Run {
                callable,
                reply: reply_tx,
            })
            .map_err(|_| terminated())?;

        reply_rx.recv().map_err(|_| terminated())?
    }

    /// Whether the current thread is the engine thread.
    pub fn is_engine_thread(&self) -> bool {
        thread::current().id() == self.inner.engine_thread
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        match self.inner.worker_handle.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for EngineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineExecutor")
            .field("engine_thread", &self.inner.engine_thread)
            .finish_non_exhaustive()
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        // Ignore errors - the worker may have already exited.
        let _ = self.request_tx.send(Job::Shutdown);

        // Brief wait for quick shutdown, then detach if the engine is slow.
        // The last handle may even be dropped on the worker itself, where
        // joining would never return.
        let handle = match self.worker_handle.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            const QUICK_CHECK_INTERVAL: Duration = Duration::from_millis(10);
            const MAX_QUICK_CHECKS: u32 = 10;

            for _ in 0..MAX_QUICK_CHECKS {
                if handle.is_finished() {
                    if let Err(e) = handle.join() {
                        tracing::warn!("Engine worker thread panicked during shutdown: {:?}", e);
                    } else {
                        tracing::debug!("Engine worker thread shut down gracefully");
                    }
                    return;
                }
                thread::sleep(QUICK_CHECK_INTERVAL);
            }

            tracing::debug!(
                "Engine worker still running after {}ms - detaching",
                QUICK_CHECK_INTERVAL.as_millis() * MAX_QUICK_CHECKS as u128
            );
        }
    }
}

fn terminated() -> EngineError {
    EngineError::with_identifier(
        "EngineProxy:terminated",
        "The engine thread has terminated",
    )
}

/// Worker loop that owns the engine.
///
/// A panicking engine call is caught and reported to its caller as an
/// `EngineError`; the worker keeps serving later jobs.
fn engine_worker_loop<E: Engine>(mut engine: E, request_rx: Receiver<Job>) {
    while let Ok(job) = request_rx.recv() {
        let (callable, reply) = match job {
            Job::Shutdown => {
                tracing::info!("Engine worker received shutdown signal, exiting");
                break;
            }
            Job::Run { callable, reply } => (callable, reply),
        };

        tracing::debug!("Engine thread running {}", callable.kind());

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.run(&callable)
        }))
        .unwrap_or_else(|panic_info| {
            let panic_msg = panic_message(panic_info.as_ref());
            tracing::error!("Engine worker caught panic: {}", panic_msg);
            Err(EngineError::with_identifier(
                "EngineProxy:panic",
                format!("Engine panicked: {panic_msg}"),
            ))
        });

        // The caller only disappears if its thread died; nothing to deliver.
        let _ = reply.send(outcome);
    }
}

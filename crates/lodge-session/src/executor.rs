//! Executors for removal notifications.
//!
//! The cache never runs removal listeners while holding its lock, and the
//! operation that caused a removal should not wait for the listener either.
//! Notifications are handed to an [`Executor`] instead.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs deferred work somewhere other than (or, for tests, on) the calling thread.
pub trait Executor: Send + Sync {
    /// Schedule `task` to run. Must not block on the task's completion.
    fn execute(&self, task: Task);
}

/// Runs every task inline on the calling thread.
///
/// Useful in tests where events must be observed deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerRuns;

impl Executor for CallerRuns {
    fn execute(&self, task: Task) {
        task();
    }
}

/// A dedicated background thread that runs tasks in submission order.
///
/// The thread exits once every handle to the dispatcher has been dropped.
#[derive(Debug, Clone)]
pub struct DispatchThread {
    tx: mpsc::UnboundedSender<Task>,
}

impl DispatchThread {
    /// Name given to the dispatcher thread.
    pub const THREAD_NAME: &'static str = "lodge-session-dispatch";

    /// Start the dispatcher thread.
    pub fn spawn() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        std::thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        warn!("Removal notification panicked, dispatcher continues");
                    }
                }
                debug!("Dispatch channel closed, stopping dispatcher thread");
            })?;

        Ok(Self { tx })
    }
}

impl Executor for DispatchThread {
    fn execute(&self, task: Task) {
        if self.tx.send(task).is_err() {
            warn!("Dispatcher thread has stopped, dropping notification");
        }
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is currently running on, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

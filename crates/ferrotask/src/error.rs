//! Error types for the task server.
//!
//! [`Error`] is the only error type the public API returns. Contention inside
//! the allocator, queue and result store is resolved by blocking and is never
//! reported; every variant below describes either API misuse, a task that
//! failed, or a task the server dropped at shutdown.
//!
//! ## Error Cases
//! - `ServerNotRunning`: `submit` outside the running state.
//! - `UnknownHandle`: the handle was never issued, was already retrieved, or
//!   is being awaited by another caller.
//! - `TaskExecution`: the task returned an error or panicked.
//! - `ServerStopped`: the task was still queued when the server stopped.
//! - `AlreadyRunning`, `InvalidWorkerCount`, `WorkerSpawn`: `start` failures.
//! - `Timeout`: a bounded wait elapsed before the result was published.

use crate::Handle;
use std::{any::Any, borrow::Cow};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the task server.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A task was submitted while the server was stopped or stopping.
    #[error("Server is not running")]
    ServerNotRunning,

    /// The handle does not name an outstanding submission.
    #[error("Unknown handle: {handle}")]
    UnknownHandle { handle: Handle },

    /// The task ran but did not produce a value.
    #[error("Task {label} ({handle}) failed: {source}")]
    TaskExecution {
        handle: Handle,
        label: String,
        #[source]
        source: TaskError,
    },

    /// The task was dropped from the queue when the server stopped.
    #[error("Server stopped before {handle} was executed")]
    ServerStopped { handle: Handle },

    /// `start` was called on a server that is not stopped.
    #[error("Server is already running")]
    AlreadyRunning,

    /// `start` was called with zero workers.
    #[error("Invalid worker count: {requested} (must be at least 1)")]
    InvalidWorkerCount { requested: usize },

    /// The operating system refused to spawn a worker thread.
    #[error("Failed to spawn worker: {reason}")]
    WorkerSpawn { reason: String },

    /// A bounded wait elapsed before the result was published.
    #[error("Timed out waiting for {handle}")]
    Timeout { handle: Handle },
}

/// The failure of a single task.
///
/// Returned by [`Task::execute`] or synthesized by a worker when the task
/// panics. Carried inside [`Error::TaskExecution`].
///
/// [`Task::execute`]: crate::Task::execute
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    message: Cow<'static, str>,
    panicked: bool,
}

impl TaskError {
    /// Creates an error describing why a task could not produce a value.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            panicked: false,
        }
    }

    /// Builds an error from the payload of a caught panic.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Cow::Borrowed(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Cow::Owned(s.clone())
        } else {
            Cow::Borrowed("task panicked")
        };
        Self {
            message,
            panicked: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the task panicked instead of returning an error.
    pub const fn panicked(&self) -> bool {
        self.panicked
    }
}

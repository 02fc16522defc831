//! The task server facade.
//!
//! [`Server`] composes the handle allocator, the pending queue, the result
//! store and the worker pool, and owns all of them for its whole lifetime.
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped --start(n)--> Running --stop()--> Stopping --(workers joined)--> Stopped
//! ```
//!
//! Each `start` builds a fresh queue and worker pool. The allocator and the
//! result store live as long as the server, so a handle from an earlier run
//! can never alias a handle issued after a restart, and results that were
//! published before a `stop` can still be retrieved afterwards.
//!
//! ## Locking
//!
//! The queue, the store and the allocator each have their own lock, and no
//! operation holds two of them at once. The lifecycle monitor is only held to
//! read or change the state, never while touching the other three. A result
//! is removed from the store, and the store's lock released, before its
//! handle goes back to the allocator; a recycled handle therefore never
//! refers to a result that has not been drained.

use crate::{
    Error, Handle, Result, ServerConfig, StatsSnapshot, Task,
    allocator::HandleAllocator,
    queue::{PendingQueue, TaskRecord},
    stats::Stats,
    store::{Outcome, ResultStore},
    sync::{Monitor, Padded, pad},
    worker::WorkerPool,
};
use core::{fmt, time::Duration};
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Lifecycle state of a [`Server`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerState {
    Stopped,
    Running,
    /// `stop` is joining the workers.
    Stopping,
}

/// State shared between the facade and every worker, for the lifetime of
/// the server.
pub(crate) struct Shared<V> {
    pub(crate) allocator: Padded<HandleAllocator>,
    pub(crate) store: Padded<ResultStore<V>>,
    pub(crate) stats: Stats,
}

struct Lifecycle<V> {
    state: ServerState,
    queue: Option<Arc<Padded<PendingQueue<V>>>>,
    pool: Option<WorkerPool>,
}

/// An in-process compute server backed by a fixed pool of worker threads.
///
/// Any number of threads may share a `&Server` to submit tasks and await
/// their results concurrently. Results are matched to callers by [`Handle`];
/// completion order is not guaranteed to follow submission order.
///
/// # Example
///
/// ```
/// use ferrotask::{PowTask, Server, SqrtTask};
/// use std::sync::Arc;
///
/// let server = Server::<f64>::new();
/// server.start(2)?;
///
/// let pow = server.submit(Arc::new(PowTask::new(5.0, 2.0)))?;
/// let sqrt = server.submit(Arc::new(SqrtTask::new(25.0)))?;
///
/// assert_eq!(server.await_result(sqrt)?, 5.0);
/// assert_eq!(server.await_result(pow)?, 25.0);
///
/// server.stop();
/// # Ok::<(), ferrotask::Error>(())
/// ```
pub struct Server<V> {
    config: ServerConfig,
    shared: Arc<Shared<V>>,
    lifecycle: Monitor<Lifecycle<V>>,
}

impl<V> Server<V> {
    /// Creates a stopped server with the default [`ServerConfig`].
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a stopped server.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                allocator: pad(HandleAllocator::new()),
                store: pad(ResultStore::new()),
                stats: Stats::default(),
            }),
            lifecycle: Monitor::new(Lifecycle {
                state: ServerState::Stopped,
                queue: None,
                pool: None,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle.lock().state
    }

    /// Number of workers in the running pool, or zero when stopped.
    pub fn worker_count(&self) -> usize {
        self.lifecycle.lock().pool.as_ref().map_or(0, WorkerPool::len)
    }

    /// Submits `task` for execution and returns its handle immediately.
    ///
    /// The server keeps its clone of `task` only until a worker has executed
    /// it. The same task may be submitted any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotRunning`] unless the server is running,
    /// including when `stop` begins concurrently with this call.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, task)))]
    pub fn submit(&self, task: Arc<dyn Task<V>>) -> Result<Handle> {
        let queue = {
            let lifecycle = self.lifecycle.lock();
            match (&lifecycle.state, &lifecycle.queue) {
                (ServerState::Running, Some(queue)) => Arc::clone(queue),
                _ => return Err(Error::ServerNotRunning),
            }
        };

        let handle = self.shared.allocator.allocate();
        self.shared.store.register(handle);
        self.shared.stats.record_submitted();

        if let Err(e) = queue.enqueue(TaskRecord { handle, task }) {
            // Stopped between the state check and the enqueue.
            self.shared.store.forget(handle);
            self.shared.allocator.release(handle);
            self.shared.stats.record_rejected();
            return Err(e);
        }

        Ok(handle)
    }

    /// Blocks until the result for `handle` is published, then returns it
    /// and recycles the handle.
    ///
    /// There is no deadline; see [`Self::await_result_timeout`] for a
    /// bounded wait.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownHandle`] if `handle` was never issued, its result was
    ///   already retrieved, or another caller is already awaiting it.
    /// - [`Error::TaskExecution`] if the task returned an error or panicked.
    /// - [`Error::ServerStopped`] if the task was dropped by [`Self::stop`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn await_result(&self, handle: Handle) -> Result<V> {
        let outcome = self.shared.store.wait(handle);
        self.redeem(handle, outcome)
    }

    /// Like [`Self::await_result`], but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`Self::await_result`], plus [`Error::Timeout`] when the result is
    /// not published in time. The handle stays valid after a timeout and can
    /// be awaited again.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn await_result_timeout(&self, handle: Handle, timeout: Duration) -> Result<V> {
        let outcome = self.shared.store.wait_timeout(handle, timeout);
        self.redeem(handle, outcome)
    }

    fn redeem(&self, handle: Handle, outcome: Result<Outcome<V>>) -> Result<V> {
        match outcome {
            Ok(outcome) => {
                self.recycle(handle);
                outcome.map_err(|failure| Error::TaskExecution {
                    handle,
                    label: failure.label,
                    source: failure.error,
                })
            }
            Err(err @ Error::ServerStopped { .. }) => {
                self.recycle(handle);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Must run after the store has removed the slot for `handle`.
    fn recycle(&self, handle: Handle) {
        self.shared.allocator.release(handle);
        self.shared.stats.record_retrieved();
    }

    /// Stops the server and blocks until every worker has exited.
    ///
    /// Tasks still queued are handled per [`ShutdownPolicy`]: with the
    /// default `Abandon` they are dropped and awaiting their handles fails
    /// with [`Error::ServerStopped`]; with `Drain` they are executed before
    /// this returns. Tasks already executing always finish and publish.
    ///
    /// Calling `stop` on a stopped server does nothing. A call made while
    /// another thread is stopping the server waits for that stop to finish.
    ///
    /// [`ShutdownPolicy`]: crate::ShutdownPolicy
    pub fn stop(&self) {
        let lifecycle = self.lifecycle.lock();
        let mut lifecycle = self.lifecycle.wait_while(lifecycle, |lifecycle| {
            lifecycle.state == ServerState::Stopping
        });
        if lifecycle.state == ServerState::Stopped {
            return;
        }
        lifecycle.state = ServerState::Stopping;
        let queue = lifecycle.queue.take();
        let pool = lifecycle.pool.take();
        drop(lifecycle);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Stopping server with policy {:?}",
            self.config.shutdown_policy
        );

        if let Some(queue) = queue {
            queue.close(self.config.shutdown_policy);
            if let Some(pool) = pool {
                pool.join();
            }

            let abandoned: Vec<Handle> = queue.drain().into_iter().map(|r| r.handle).collect();
            if !abandoned.is_empty() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Dropped {} queued tasks at shutdown", abandoned.len());
                self.shared.stats.record_abandoned(abandoned.len() as u64);
                self.shared.store.abandon(abandoned);
            }
        }

        self.lifecycle.lock().state = ServerState::Stopped;
        self.lifecycle.notify_all();

        #[cfg(feature = "tracing")]
        tracing::info!("Server stopped");
    }

    /// A snapshot of the server's counters.
    pub fn stats(&self) -> StatsSnapshot {
        let queue = self.lifecycle.lock().queue.clone();
        let queued = queue.map_or(0, |queue| queue.len());
        self.shared
            .stats
            .snapshot(queued, self.shared.allocator.outstanding())
    }
}

impl<V: Send + 'static> Server<V> {
    /// Spawns `worker_count` workers and starts accepting tasks.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWorkerCount`] if `worker_count` is zero.
    /// - [`Error::AlreadyRunning`] unless the server is stopped.
    /// - [`Error::WorkerSpawn`] if a worker thread cannot be created; the
    ///   server stays stopped.
    pub fn start(&self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(Error::InvalidWorkerCount {
                requested: worker_count,
            });
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ServerState::Stopped {
            return Err(Error::AlreadyRunning);
        }

        let queue = Arc::new(pad(PendingQueue::new()));
        let pool = WorkerPool::spawn(worker_count, &self.config, &queue, &self.shared)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Started {} workers ({}-*)",
            pool.len(),
            self.config.thread_name_prefix
        );

        lifecycle.queue = Some(queue);
        lifecycle.pool = Some(pool);
        lifecycle.state = ServerState::Running;
        Ok(())
    }
}

impl<V> Default for Server<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for Server<V> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<V> fmt::Debug for Server<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}

//! The fixed pool of OS threads that execute queued tasks.
//!
//! Each worker alternates between two states: idle, blocked in
//! [`PendingQueue::dequeue`], and executing a single task. Execution happens
//! with no lock held so the remaining workers keep draining the queue. A task
//! that returns an error or panics is reported through its result envelope;
//! the worker always returns to its idle loop.

use crate::{
    Error, Result, ServerConfig, ShutdownPolicy, Task, TaskError,
    queue::{PendingQueue, TaskRecord},
    server::Shared,
    store::{Outcome, TaskFailure},
    sync::Padded,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Join handles of the workers spawned by one [`Server::start`].
///
/// [`Server::start`]: crate::Server::start
pub(crate) struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` named workers consuming `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerSpawn`] if a thread cannot be created. Workers
    /// spawned before the failure are shut down and joined first.
    pub(crate) fn spawn<V: Send + 'static>(
        count: usize,
        config: &ServerConfig,
        queue: &Arc<Padded<PendingQueue<V>>>,
        shared: &Arc<Shared<V>>,
    ) -> Result<Self> {
        let mut pool = Self {
            workers: Vec::with_capacity(count),
        };

        for worker_id in 0..count {
            let mut builder =
                thread::Builder::new().name(format!("{}-{worker_id}", config.thread_name_prefix));
            if let Some(bytes) = config.stack_size {
                builder = builder.stack_size(bytes);
            }

            let worker_queue = Arc::clone(queue);
            let worker_shared = Arc::clone(shared);
            let spawned =
                builder.spawn(move || worker_loop(worker_id, &worker_queue, &worker_shared));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to spawn worker {worker_id}: {e}");
                    queue.close(ShutdownPolicy::Abandon);
                    pool.join();
                    return Err(Error::WorkerSpawn {
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until every worker has exited.
    pub(crate) fn join(self) {
        for (_worker_id, handle) in self.workers.into_iter().enumerate() {
            if handle.join().is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!("Worker {_worker_id} terminated by panic");
            }
        }
    }
}

/// Reported in place of the label of a task whose `label` panicked.
const UNKNOWN_LABEL: &str = "<unknown>";

/// Runs `task`, turning a returned error or a panic into a [`TaskFailure`].
/// No user code called from here can unwind into the worker.
fn execute<V>(task: &dyn Task<V>) -> Outcome<V> {
    let error = match panic::catch_unwind(AssertUnwindSafe(|| task.execute())) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(error)) => error,
        Err(payload) => TaskError::from_panic(&*payload),
    };
    let label = panic::catch_unwind(AssertUnwindSafe(|| task.label().to_owned()))
        .unwrap_or_else(|_| String::from(UNKNOWN_LABEL));
    Err(TaskFailure { label, error })
}

/// Runs one worker until the queue tells it to stop.
pub(crate) fn worker_loop<V>(worker_id: usize, queue: &PendingQueue<V>, shared: &Shared<V>) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");
    #[cfg(not(feature = "tracing"))]
    let _ = worker_id;

    while let Some(TaskRecord { handle, task }) = queue.dequeue() {
        let outcome = execute(&*task);
        // The caller owns the task; only the outcome outlives execution.
        if panic::catch_unwind(AssertUnwindSafe(move || drop(task))).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker {worker_id}: dropping task {handle} panicked");
        }

        #[cfg(feature = "tracing")]
        if let Err(failure) = &outcome {
            tracing::debug!(
                "Worker {worker_id}: task {} ({handle}) failed: {}",
                failure.label,
                failure.error
            );
        }
        shared.stats.record_executed(outcome.is_ok());
        shared.store.publish(handle, outcome);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

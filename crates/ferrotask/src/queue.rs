use crate::{Error, Handle, Result, ShutdownPolicy, Task, sync::Monitor};
use std::{collections::VecDeque, sync::Arc};

/// A submitted task paired with the handle its result will be published
/// under. Consumed by exactly one worker.
pub(crate) struct TaskRecord<V> {
    pub(crate) handle: Handle,
    pub(crate) task: Arc<dyn Task<V>>,
}

struct QueueState<V> {
    records: VecDeque<TaskRecord<V>>,
    closed: Option<ShutdownPolicy>,
}

/// Thread-safe FIFO of [`TaskRecord`]s awaiting execution.
///
/// Workers block in [`Self::dequeue`] on a single predicate that covers both
/// "work available" and "queue closed", so a shutdown never races with an
/// idle worker's wait. Once closed, the queue refuses new records.
pub(crate) struct PendingQueue<V> {
    monitor: Monitor<QueueState<V>>,
}

impl<V> PendingQueue<V> {
    pub(crate) fn new() -> Self {
        Self {
            monitor: Monitor::new(QueueState {
                records: VecDeque::new(),
                closed: None,
            }),
        }
    }

    /// Appends `record` and wakes one idle worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotRunning`] if the queue has been closed; the
    /// record is dropped.
    pub(crate) fn enqueue(&self, record: TaskRecord<V>) -> Result<()> {
        let mut state = self.monitor.lock();
        if state.closed.is_some() {
            return Err(Error::ServerNotRunning);
        }
        state.records.push_back(record);
        drop(state);

        self.monitor.notify_one();
        Ok(())
    }

    /// Blocks until a record is available or the queue is closed.
    ///
    /// Returns `None` when the calling worker should exit: immediately after
    /// an [`ShutdownPolicy::Abandon`] close, or once the queue is empty after
    /// a [`ShutdownPolicy::Drain`] close.
    pub(crate) fn dequeue(&self) -> Option<TaskRecord<V>> {
        let state = self.monitor.lock();
        let mut state = self.monitor.wait_while(state, |state| {
            state.records.is_empty() && state.closed.is_none()
        });

        match state.closed {
            Some(ShutdownPolicy::Abandon) => None,
            Some(ShutdownPolicy::Drain) | None => state.records.pop_front(),
        }
    }

    /// Refuses further records and wakes every idle worker. Only the first
    /// call's policy takes effect.
    pub(crate) fn close(&self, policy: ShutdownPolicy) {
        let mut state = self.monitor.lock();
        state.closed.get_or_insert(policy);
        drop(state);

        self.monitor.notify_all();
    }

    /// Removes and returns every record still queued.
    pub(crate) fn drain(&self) -> Vec<TaskRecord<V>> {
        self.monitor.lock().records.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.monitor.lock().records.len()
    }
}

use crate::{Error, Handle, Result, TaskError, sync::Monitor};
use core::time::Duration;
use std::collections::HashMap;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A task that ran but produced no value, together with the label it
/// reported.
#[derive(Debug)]
pub(crate) struct TaskFailure {
    pub(crate) label: String,
    pub(crate) error: TaskError,
}

/// The result envelope a worker publishes for one handle.
pub(crate) type Outcome<V> = core::result::Result<V, TaskFailure>;

enum SlotState<V> {
    Pending,
    Ready(Outcome<V>),
    Abandoned,
}

struct Slot<V> {
    claimed: bool,
    state: SlotState<V>,
}

/// Thread-safe map from [`Handle`] to the outcome of its task.
///
/// A slot is registered when a task is submitted, resolved exactly once
/// (published by a worker or abandoned at shutdown), and removed by the one
/// caller that claimed it. A missing slot means the handle was never issued
/// or its result has already been retrieved.
///
/// Every waiter shares one condition variable. A resolution broadcasts to all
/// of them and each re-checks only its own slot, so callers waiting on
/// different handles never block each other.
pub(crate) struct ResultStore<V> {
    monitor: Monitor<HashMap<Handle, Slot<V>>>,
}

impl<V> ResultStore<V> {
    pub(crate) fn new() -> Self {
        Self {
            monitor: Monitor::new(HashMap::new()),
        }
    }

    /// Creates the pending slot for a freshly allocated handle.
    pub(crate) fn register(&self, handle: Handle) {
        let previous = self.monitor.lock().insert(
            handle,
            Slot {
                claimed: false,
                state: SlotState::Pending,
            },
        );
        debug_assert!(previous.is_none(), "{handle} registered while outstanding");
    }

    /// Removes a slot whose task never made it into the queue.
    pub(crate) fn forget(&self, handle: Handle) {
        self.monitor.lock().remove(&handle);
    }

    /// Stores `outcome` under `handle` and wakes every waiter.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, outcome)))]
    pub(crate) fn publish(&self, handle: Handle, outcome: Outcome<V>) {
        let mut slots = self.monitor.lock();
        let slot = slots.entry(handle).or_insert(Slot {
            claimed: false,
            state: SlotState::Pending,
        });
        debug_assert!(matches!(slot.state, SlotState::Pending));
        slot.state = SlotState::Ready(outcome);
        drop(slots);

        self.monitor.notify_all();
    }

    /// Resolves the slots of tasks that will never run and wakes every
    /// waiter. Slots that are already resolved are left alone.
    pub(crate) fn abandon(&self, handles: impl IntoIterator<Item = Handle>) {
        let mut slots = self.monitor.lock();
        for handle in handles {
            if let Some(slot) = slots.get_mut(&handle) {
                if matches!(slot.state, SlotState::Pending) {
                    slot.state = SlotState::Abandoned;
                }
            }
        }
        drop(slots);

        self.monitor.notify_all();
    }

    /// Claims `handle`, blocks until its slot is resolved, then removes it.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownHandle`] if there is no slot, or another caller has
    ///   already claimed it.
    /// - [`Error::ServerStopped`] if the task was abandoned. The slot is
    ///   removed in this case too.
    pub(crate) fn wait(&self, handle: Handle) -> Result<Outcome<V>> {
        let mut slots = self.monitor.lock();
        claim(&mut slots, handle)?;

        slots = self.monitor.wait_while(slots, |slots| is_pending(slots, handle));
        take(&mut slots, handle)
    }

    /// Like [`Self::wait`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`Self::wait`], plus [`Error::Timeout`] if the slot is still
    /// pending when `timeout` elapses. The claim is released on timeout, so
    /// the handle can be awaited again.
    pub(crate) fn wait_timeout(&self, handle: Handle, timeout: Duration) -> Result<Outcome<V>> {
        let mut slots = self.monitor.lock();
        claim(&mut slots, handle)?;

        let (mut slots, timed_out) = self
            .monitor
            .wait_timeout_while(slots, timeout, |slots| is_pending(slots, handle));
        if timed_out {
            if let Some(slot) = slots.get_mut(&handle) {
                slot.claimed = false;
            }
            return Err(Error::Timeout { handle });
        }
        take(&mut slots, handle)
    }
}

fn claim<V>(slots: &mut HashMap<Handle, Slot<V>>, handle: Handle) -> Result<()> {
    match slots.get_mut(&handle) {
        Some(slot) if !slot.claimed => {
            slot.claimed = true;
            Ok(())
        }
        _ => Err(Error::UnknownHandle { handle }),
    }
}

fn is_pending<V>(slots: &HashMap<Handle, Slot<V>>, handle: Handle) -> bool {
    matches!(
        slots.get(&handle),
        Some(Slot {
            state: SlotState::Pending,
            ..
        })
    )
}

fn take<V>(slots: &mut HashMap<Handle, Slot<V>>, handle: Handle) -> Result<Outcome<V>> {
    // Only the claimant removes a claimed slot, so it is still present here.
    match slots.remove(&handle).map(|slot| slot.state) {
        Some(SlotState::Ready(outcome)) => Ok(outcome),
        Some(SlotState::Abandoned) => Err(Error::ServerStopped { handle }),
        Some(SlotState::Pending) | None => Err(Error::UnknownHandle { handle }),
    }
}

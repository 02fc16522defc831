use portable_atomic::{AtomicU64, Ordering};

/// Lifetime counters shared between the server facade and its workers.
#[derive(Default)]
pub(crate) struct Stats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    retrieved: AtomicU64,
}

impl Stats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.submitted.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_retrieved(&self) {
        self.retrieved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queued: usize, unretrieved: u64) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retrieved: self.retrieved.load(Ordering::Relaxed),
            queued: queued as u64,
            unretrieved,
        }
    }
}

/// A point-in-time view of a [`Server`]'s counters.
///
/// Counters are read independently without a global lock, so a snapshot
/// taken while tasks are in flight may be momentarily inconsistent (e.g.
/// `completed` may already include a task whose submission is still being
/// recorded). Once the server is idle the snapshot is exact.
///
/// [`Server`]: crate::Server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    /// Tasks accepted by `submit` since the server was created.
    pub submitted: u64,
    /// Tasks that produced a value.
    pub completed: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
    /// Tasks dropped from the queue at shutdown.
    pub abandoned: u64,
    /// Outcomes handed back to callers, including `ServerStopped`.
    pub retrieved: u64,
    /// Tasks waiting in the queue right now.
    pub queued: u64,
    /// Submissions whose outcome has not been retrieved yet.
    pub unretrieved: u64,
}

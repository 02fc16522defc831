use crate::{
    Handle,
    sync::{Mutex, lock},
};
use std::collections::VecDeque;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A lock-based allocator that issues and recycles [`Handle`]s.
///
/// The allocator keeps a monotonically increasing counter of never-issued
/// values and a FIFO of released values. Released values are handed out
/// first, so the handle space stays dense under steady load.
///
/// ## Invariants
/// - A value is either never issued, outstanding, or released; never two of
///   these at once.
/// - [`Self::release`] is only called after the result for that handle has
///   been removed from the result store, so a recycled handle never aliases a
///   result that is still waiting to be retrieved.
///
/// All state sits behind a single mutex; concurrent `allocate` and `release`
/// calls serialize without losing or duplicating a value.
pub(crate) struct HandleAllocator {
    state: Mutex<AllocatorState>,
}

struct AllocatorState {
    next: u64,
    released: VecDeque<u64>,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: 0,
                released: VecDeque::new(),
            }),
        }
    }

    /// Returns the oldest released handle, or the next never-used one.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub(crate) fn allocate(&self) -> Handle {
        let mut state = lock(&self.state);
        let raw = match state.released.pop_front() {
            Some(raw) => raw,
            None => {
                let raw = state.next;
                state.next += 1;
                raw
            }
        };
        Handle::from_raw(raw)
    }

    /// Returns `handle` to the pool for reuse.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub(crate) fn release(&self, handle: Handle) {
        let mut state = lock(&self.state);
        debug_assert!(
            handle.to_raw() < state.next,
            "released a handle that was never issued"
        );
        state.released.push_back(handle.to_raw());
    }

    /// Number of handles issued and not yet released.
    pub(crate) fn outstanding(&self) -> u64 {
        let state = lock(&self.state);
        state.next - state.released.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread::scope;

    #[test]
    fn issues_fresh_handles_in_order() {
        let allocator = HandleAllocator::new();
        let ids: Vec<_> = (0..4).map(|_| allocator.allocate().to_raw()).collect();
        assert_eq!(ids, [0, 1, 2, 3]);
        assert_eq!(allocator.outstanding(), 4);
    }

    #[test]
    fn reuses_released_handles_oldest_first() {
        let allocator = HandleAllocator::new();
        let a = allocator.allocate();
        let b = allocator.allocate();
        let c = allocator.allocate();

        allocator.release(b);
        allocator.release(a);
        assert_eq!(allocator.outstanding(), 1);

        assert_eq!(allocator.allocate(), b);
        assert_eq!(allocator.allocate(), a);
        assert_eq!(allocator.allocate().to_raw(), c.to_raw() + 1);
    }

    #[test]
    fn concurrent_allocation_never_duplicates() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2048;

        let allocator = Arc::new(HandleAllocator::new());
        let live = Arc::new(Mutex::new(HashSet::with_capacity(THREADS * PER_THREAD)));

        scope(|s| {
            for _ in 0..THREADS {
                let allocator = Arc::clone(&allocator);
                let live = Arc::clone(&live);
                s.spawn(move || {
                    for i in 0..PER_THREAD {
                        let handle = allocator.allocate();
                        assert!(
                            live.lock().unwrap().insert(handle),
                            "{handle} issued twice while outstanding"
                        );
                        // Give back every other handle so reuse races with
                        // fresh allocation.
                        if i % 2 == 0 {
                            live.lock().unwrap().remove(&handle);
                            allocator.release(handle);
                        }
                    }
                });
            }
        });

        let live = live.lock().unwrap();
        assert_eq!(live.len(), THREADS * PER_THREAD / 2);
        assert_eq!(allocator.outstanding(), live.len() as u64);
    }
}

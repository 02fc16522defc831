//! Lock backend and the [`Monitor`] primitive every shared structure is built
//! on.
//!
//! By default the standard library's `Mutex` and `Condvar` are used. Enabling
//! the `parking-lot` feature swaps in `parking_lot`, which never poisons.
//! Tasks are never executed while a lock is held, so a poisoned std lock can
//! only come from a panic inside this crate's own bookkeeping; the guard is
//! recovered rather than surfaced to callers.

use core::time::Duration;

#[cfg(feature = "parking-lot")]
pub(crate) use parking_lot::{Condvar, Mutex, MutexGuard};
#[cfg(not(feature = "parking-lot"))]
pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};

#[cfg(not(feature = "parking-lot"))]
use std::sync::PoisonError;

/// Storage for a shared structure, padded to a cache line when the
/// `cache-padded` feature is enabled so that the queue, store and allocator
/// locks do not false-share.
#[cfg(feature = "cache-padded")]
pub(crate) type Padded<T> = crossbeam_utils::CachePadded<T>;
#[cfg(not(feature = "cache-padded"))]
pub(crate) type Padded<T> = T;

#[cfg(feature = "cache-padded")]
pub(crate) const fn pad<T>(value: T) -> Padded<T> {
    crossbeam_utils::CachePadded::new(value)
}

#[cfg(not(feature = "cache-padded"))]
pub(crate) const fn pad<T>(value: T) -> Padded<T> {
    value
}

/// Acquires `mutex`, recovering the guard if a previous holder panicked.
#[cfg(not(feature = "parking-lot"))]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acquires `mutex`.
#[cfg(feature = "parking-lot")]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock()
}

/// A mutex paired with the condition variable that signals changes to the
/// state it protects.
///
/// Every wait goes through [`Monitor::wait_while`] or
/// [`Monitor::wait_timeout_while`], which re-evaluate the predicate under the
/// lock after each wake. Spurious wakeups and broadcasts meant for other
/// waiters are therefore harmless.
pub(crate) struct Monitor<T> {
    state: Mutex<T>,
    changed: Condvar,
}

impl<T> Monitor<T> {
    pub(crate) fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        lock(&self.state)
    }

    /// Blocks while `condition` holds, returning the re-acquired guard.
    #[cfg(not(feature = "parking-lot"))]
    pub(crate) fn wait_while<'a, F>(
        &self,
        guard: MutexGuard<'a, T>,
        condition: F,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        self.changed
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while `condition` holds, returning the re-acquired guard.
    #[cfg(feature = "parking-lot")]
    pub(crate) fn wait_while<'a, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        condition: F,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        self.changed.wait_while(&mut guard, condition);
        guard
    }

    /// Like [`Self::wait_while`], giving up after `timeout`. The flag is
    /// `true` when the wait ended because the timeout elapsed with the
    /// condition still holding.
    #[cfg(not(feature = "parking-lot"))]
    pub(crate) fn wait_timeout_while<'a, F>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        condition: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        let (guard, result) = self
            .changed
            .wait_timeout_while(guard, timeout, condition)
            .unwrap_or_else(PoisonError::into_inner);
        (guard, result.timed_out())
    }

    /// Like [`Self::wait_while`], giving up after `timeout`. The flag is
    /// `true` when the wait ended because the timeout elapsed with the
    /// condition still holding.
    #[cfg(feature = "parking-lot")]
    pub(crate) fn wait_timeout_while<'a, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        condition: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        let result = self.changed.wait_while_for(&mut guard, condition, timeout);
        (guard, result.timed_out())
    }

    pub(crate) fn notify_one(&self) {
        self.changed.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        self.changed.notify_all();
    }
}

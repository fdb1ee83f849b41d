//! Pool entries and their per-entry lock state machine

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Opaque, stable identity of a pool entry.
///
/// Keys are assigned from a monotonic counter at creation time and never
/// reused for the lifetime of a pool, so a key held past its entry's removal
/// simply stops resolving. Pooled resources themselves need no `Hash` or `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey(pub(crate) u64);

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Checkout state of a single entry.
///
/// Two states, `Unlocked` and `Locked`, with the sole admission-control
/// primitive being the atomic compare-exchange in [`try_lock`]. Removal from
/// the pool is a pool-level operation, not a lock transition.
///
/// [`try_lock`]: EntryLock::try_lock
#[derive(Debug)]
pub(crate) struct EntryLock {
    created: Instant,
    locked: AtomicBool,
    last_locked: Mutex<Instant>,
    lock_count: AtomicU64,
}

impl EntryLock {
    /// A fresh, unlocked lock record.
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            created: now,
            locked: AtomicBool::new(false),
            last_locked: Mutex::new(now),
            lock_count: AtomicU64::new(0),
        }
    }

    /// A lock record born locked, for entries handed straight to the caller
    /// that created them. Counts as the first lock.
    pub(crate) fn new_locked() -> Self {
        let now = Instant::now();
        Self {
            created: now,
            locked: AtomicBool::new(true),
            last_locked: Mutex::new(now),
            lock_count: AtomicU64::new(1),
        }
    }

    /// Atomic `Unlocked -> Locked`. On success records the lock time and
    /// bumps the lock count; a contended attempt has no side effect.
    pub(crate) fn try_lock(&self) -> bool {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // Only the transition winner reaches these writes.
        *self.last_locked.lock() = Instant::now();
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Unconditional `Locked -> Unlocked`. Idempotent: a double unlock must
    /// not wedge the pool.
    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub(crate) fn lock_count(&self) -> u64 {
        self.lock_count.load(Ordering::Relaxed)
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created)
    }

    /// Time since the last successful lock transition (or creation, for an
    /// entry never locked since).
    pub(crate) fn idle(&self, now: Instant) -> Duration {
        now.duration_since(*self.last_locked.lock())
    }
}

/// A live pool record: the resource plus its lock state.
///
/// The resource sits behind an `Arc` so a checkout guard keeps it alive even
/// if the entry is force-evicted out from under the holder.
#[derive(Debug)]
pub(crate) struct Entry<T> {
    pub(crate) resource: Arc<T>,
    pub(crate) lock: EntryLock,
}

impl<T> Entry<T> {
    pub(crate) fn new_locked(resource: T) -> Self {
        Self {
            resource: Arc::new(resource),
            lock: EntryLock::new_locked(),
        }
    }
}

//! Core pool implementation: checkout, release, destroy, shutdown

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::{BackoffPolicy, FailureStreak};
use crate::config::{Limits, PoolConfig};
use crate::controller::PoolController;
use crate::entry::{Entry, EntryKey};
use crate::errors::{PoolError, PoolResult};
use crate::metrics::{PoolStats, StatsTracker};
use crate::scanner;

/// Pause between attempts inside the wait loop, so waiting callers never
/// starve others of CPU.
const WAIT_RETRY_PAUSE: Duration = Duration::from_millis(10);

/// An exclusive checkout of a pooled resource.
///
/// Dereferences to the resource. Dropping the handle returns the checkout to
/// the pool; calling [`Pool::release`] or a successful [`Pool::destroy`] does
/// the same explicitly and disarms the automatic return.
pub struct Pooled<T> {
    key: EntryKey,
    value: Option<Arc<T>>,
    return_fn: Arc<dyn Fn(EntryKey) + Send + Sync>,
}

impl<T> Pooled<T> {
    fn new(key: EntryKey, value: Arc<T>, return_fn: Arc<dyn Fn(EntryKey) + Send + Sync>) -> Self {
        Self {
            key,
            value: Some(value),
            return_fn,
        }
    }

    /// The entry's stable identity within its pool.
    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub(crate) fn detach(&mut self) {
        self.value.take();
    }
}

impl<T> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("key", &self.key)
            .field("live", &self.value.is_some())
            .finish()
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("resource already released or destroyed")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if self.value.take().is_some() {
            (self.return_fn)(self.key);
        }
    }
}

/// Shared pool state; `Pool` is a cheap clonable handle onto one of these.
pub(crate) struct PoolCore<C: PoolController> {
    pub(crate) entries: Arc<DashMap<EntryKey, Entry<C::Resource>>>,
    pub(crate) limits: Limits,
    pub(crate) stats: Arc<StatsTracker>,
    controller: C,
    backoff: BackoffPolicy,
    create_retry_limit: usize,
    wait_timeout: Duration,
    next_key: AtomicU64,
    pending_creates: AtomicUsize,
    creation_allowed: AtomicBool,
    failure_streak: FailureStreak,
    return_fn: Arc<dyn Fn(EntryKey) + Send + Sync>,
    scan_token: CancellationToken,
    scan_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C: PoolController> PoolCore<C> {
    fn checkout_existing(&self) -> Option<Pooled<C::Resource>> {
        for entry in self.entries.iter() {
            if entry.lock.try_lock() {
                self.stats.acquired.fetch_add(1, Ordering::Relaxed);
                trace!(key = %entry.key(), "checked out existing entry");
                return Some(Pooled::new(
                    *entry.key(),
                    entry.resource.clone(),
                    self.return_fn.clone(),
                ));
            }
        }
        None
    }

    async fn create_locked(&self) -> PoolResult<Pooled<C::Resource>> {
        // Reserve a slot before invoking the hook; racing creators see each
        // other through the pending count, so the size invariant holds
        // without serializing the (possibly slow) create hook itself.
        let reserved = self.pending_creates.fetch_add(1, Ordering::SeqCst);
        if self.entries.len() + reserved >= self.limits.max_pool_size() {
            self.pending_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::CapacityExceeded);
        }
        if !self.creation_allowed.load(Ordering::SeqCst) {
            self.pending_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::CreationDisabled);
        }

        match self.controller.on_create().await {
            Ok(resource) => {
                self.failure_streak.reset();
                let key = EntryKey(self.next_key.fetch_add(1, Ordering::Relaxed));
                let entry = Entry::new_locked(resource);
                let handle = Pooled::new(key, entry.resource.clone(), self.return_fn.clone());
                self.entries.insert(key, entry);
                self.pending_creates.fetch_sub(1, Ordering::SeqCst);
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                self.stats.acquired.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "created new pooled resource");
                Ok(handle)
            }
            Err(source) => {
                self.pending_creates.fetch_sub(1, Ordering::SeqCst);
                self.stats.creation_failures.fetch_add(1, Ordering::Relaxed);
                let attempts = self.failure_streak.record_failure();
                let delay = self.backoff.delay(attempts);
                warn!(attempts, ?delay, error = %source, "resource creation failed");
                Err(PoolError::CreationFailed {
                    attempts,
                    multiplier: self.backoff.multiplier,
                    delay,
                    source,
                })
            }
        }
    }

    /// Remove an entry and run the destroy hook. Non-forced removal first
    /// claims the entry lock, so a checkout handed to a concurrent acquirer
    /// is never reaped; forced removal ignores lock state (stuck-checkout
    /// reclamation). Removal happens before the hook runs, so the entry is
    /// unreachable through the pool even if the hook fails.
    pub(crate) async fn destroy_entry(&self, key: EntryKey, force: bool) -> PoolResult<bool> {
        if !force {
            let claimed = match self.entries.get(&key) {
                Some(entry) => entry.lock.try_lock(),
                None => return Ok(false),
            };
            if !claimed {
                return Ok(false);
            }
        }
        let Some((_, entry)) = self.entries.remove(&key) else {
            return Ok(false);
        };
        self.stats.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, force, "destroying pooled resource");
        self.controller
            .on_destroy(&entry.resource)
            .await
            .map_err(PoolError::DestroyFailed)?;
        Ok(true)
    }
}

impl<C: PoolController> Drop for PoolCore<C> {
    fn drop(&mut self) {
        // Last handle gone: stop the scanner without waiting for it.
        self.scan_token.cancel();
    }
}

/// A bounded pool of reusable resources with exclusive checkouts.
///
/// Cloning is cheap and all clones drive the same pool. The pool spawns its
/// expiration scanner at construction, so it must be created inside a Tokio
/// runtime.
pub struct Pool<C: PoolController> {
    core: Arc<PoolCore<C>>,
}

impl<C: PoolController> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<C: PoolController> Pool<C> {
    /// Create a pool and start its expiration scanner.
    pub fn new(controller: C, config: PoolConfig) -> Self {
        let entries: Arc<DashMap<EntryKey, Entry<C::Resource>>> = Arc::new(DashMap::new());
        let stats = Arc::new(StatsTracker::default());
        let return_fn: Arc<dyn Fn(EntryKey) + Send + Sync> = {
            let entries = entries.clone();
            let stats = stats.clone();
            Arc::new(move |key| {
                if let Some(entry) = entries.get(&key) {
                    entry.lock.unlock();
                    stats.released.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let core = Arc::new(PoolCore {
            entries,
            limits: Limits::new(&config),
            stats,
            controller,
            backoff: config.backoff,
            create_retry_limit: config.create_retry_limit,
            wait_timeout: config.wait_timeout,
            next_key: AtomicU64::new(0),
            pending_creates: AtomicUsize::new(0),
            creation_allowed: AtomicBool::new(true),
            failure_streak: FailureStreak::default(),
            return_fn,
            scan_token: CancellationToken::new(),
            scan_handle: Mutex::new(None),
        });

        let scan_task = scanner::spawn(
            Arc::downgrade(&core),
            core.scan_token.clone(),
            config.scan_interval,
        );
        *core.scan_handle.lock() = Some(scan_task);

        Self { core }
    }

    /// Check a resource out.
    ///
    /// Scans existing entries first; the first whose lock transition succeeds
    /// is returned. Otherwise a new resource is created if the pool has room
    /// and creation is allowed. Creation failures are retried here with
    /// backoff sleeps, up to `create_retry_limit` times, after which the
    /// final [`PoolError::CreationFailed`] is handed to the caller.
    pub async fn acquire(&self) -> PoolResult<Pooled<C::Resource>> {
        let mut retries = 0usize;
        loop {
            if let Some(handle) = self.core.checkout_existing() {
                return Ok(handle);
            }
            match self.core.create_locked().await {
                Ok(handle) => return Ok(handle),
                Err(PoolError::CreationFailed {
                    attempts,
                    multiplier,
                    delay,
                    source,
                }) => {
                    if retries >= self.core.create_retry_limit {
                        return Err(PoolError::CreationFailed {
                            attempts,
                            multiplier,
                            delay,
                            source,
                        });
                    }
                    retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Like [`acquire`](Pool::acquire), but keeps trying until the
    /// configured `wait_timeout` elapses.
    pub async fn acquire_wait(&self) -> PoolResult<Pooled<C::Resource>> {
        self.acquire_wait_for(self.core.wait_timeout).await
    }

    /// Like [`acquire`](Pool::acquire), but keeps trying until `timeout`
    /// elapses, sleeping briefly between attempts.
    pub async fn acquire_wait_for(&self, timeout: Duration) -> PoolResult<Pooled<C::Resource>> {
        tokio::time::timeout(timeout, async {
            loop {
                match self.acquire().await {
                    Ok(handle) => return handle,
                    Err(_) => tokio::time::sleep(WAIT_RETRY_PAUSE).await,
                }
            }
        })
        .await
        .map_err(|_| PoolError::AcquireTimeout(timeout))
    }

    /// Return a checkout to the pool.
    ///
    /// Returns false if the entry is no longer a pool member (for instance
    /// after a forced eviction), with no other effect.
    pub fn release(&self, mut handle: Pooled<C::Resource>) -> bool {
        handle.detach();
        let key = handle.key();
        match self.core.entries.get(&key) {
            Some(entry) => {
                entry.lock.unlock();
                self.core.stats.released.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                debug!(key = %key, "release of unknown handle ignored");
                false
            }
        }
    }

    /// Destroy the checked-out entry.
    ///
    /// A held checkout is locked by definition, so destroying it requires
    /// `force = true`; a non-forced call refuses with `Ok(false)` and leaves
    /// both the entry and the handle untouched. On removal the handle is
    /// disarmed and the destroy hook runs exactly once; a hook failure
    /// surfaces as [`PoolError::DestroyFailed`] after the entry is already
    /// gone from the pool.
    pub async fn destroy(
        &self,
        handle: &mut Pooled<C::Resource>,
        force: bool,
    ) -> PoolResult<bool> {
        let key = handle.key();
        match self.core.destroy_entry(key, force).await {
            Ok(true) => {
                handle.detach();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                // The entry was removed before the hook ran.
                handle.detach();
                Err(err)
            }
        }
    }

    /// Destroy every entry that is not currently checked out.
    ///
    /// Returns the number destroyed. Locked entries are skipped, same as a
    /// non-forced [`destroy`](Pool::destroy).
    pub async fn destroy_all(&self) -> PoolResult<usize> {
        let keys: Vec<EntryKey> = self.core.entries.iter().map(|entry| *entry.key()).collect();
        let mut destroyed = 0;
        for key in keys {
            if self.core.destroy_entry(key, false).await? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Shut the pool down: disable creation, stop the scanner (no further
    /// pass starts once this returns; an in-flight pass finishes first), and
    /// destroy all idle entries.
    ///
    /// Entries checked out at shutdown stay alive until their holders
    /// release or force-destroy them.
    pub async fn shutdown(&self) -> PoolResult<usize> {
        self.core.creation_allowed.store(false, Ordering::SeqCst);
        self.core.scan_token.cancel();
        let scan_task = self.core.scan_handle.lock().take();
        if let Some(task) = scan_task {
            if let Err(err) = task.await {
                warn!(error = %err, "expiration scanner did not join cleanly");
            }
        }
        info!("pool shut down, destroying idle entries");
        self.destroy_all().await
    }

    // Runtime-tunable limits.

    pub fn max_pool_size(&self) -> usize {
        self.core.limits.max_pool_size()
    }

    pub fn set_max_pool_size(&self, size: usize) {
        self.core.limits.set_max_pool_size(size);
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.core.limits.max_age()
    }

    pub fn set_max_age(&self, value: Option<Duration>) {
        self.core.limits.set_max_age(value);
    }

    pub fn max_idle_time(&self) -> Option<Duration> {
        self.core.limits.max_idle_time()
    }

    pub fn set_max_idle_time(&self, value: Option<Duration>) {
        self.core.limits.set_max_idle_time(value);
    }

    pub fn max_lock_count(&self) -> Option<u64> {
        self.core.limits.max_lock_count()
    }

    pub fn set_max_lock_count(&self, value: Option<u64>) {
        self.core.limits.set_max_lock_count(value);
    }

    pub fn max_lock_time(&self) -> Option<Duration> {
        self.core.limits.max_lock_time()
    }

    pub fn set_max_lock_time(&self, value: Option<Duration>) {
        self.core.limits.set_max_lock_time(value);
    }

    // Observability.

    /// Number of entries currently in the pool.
    pub fn size(&self) -> usize {
        self.core.entries.len()
    }

    /// Number of entries currently checked out.
    pub fn locked_count(&self) -> usize {
        self.core
            .entries
            .iter()
            .filter(|entry| entry.lock.is_locked())
            .count()
    }

    /// Age of the oldest entry, zero for an empty pool.
    pub fn oldest_age(&self) -> Duration {
        let now = Instant::now();
        self.core
            .entries
            .iter()
            .map(|entry| entry.lock.age(now))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Longest idle time among unlocked entries, zero if none.
    pub fn longest_idle(&self) -> Duration {
        let now = Instant::now();
        self.core
            .entries
            .iter()
            .filter(|entry| !entry.lock.is_locked())
            .map(|entry| entry.lock.idle(now))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Highest lock count among current entries.
    pub fn highest_lock_count(&self) -> u64 {
        self.core
            .entries
            .iter()
            .map(|entry| entry.lock.lock_count())
            .max()
            .unwrap_or(0)
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        let counters = &self.core.stats;
        PoolStats {
            size: self.size(),
            locked: self.locked_count(),
            max_pool_size: self.max_pool_size(),
            oldest_age: self.oldest_age(),
            longest_idle: self.longest_idle(),
            highest_lock_count: self.highest_lock_count(),
            total_acquired: counters.acquired.load(Ordering::Relaxed),
            total_released: counters.released.load(Ordering::Relaxed),
            total_created: counters.created.load(Ordering::Relaxed),
            total_destroyed: counters.destroyed.load(Ordering::Relaxed),
            total_expired: counters.expired.load(Ordering::Relaxed),
            forced_evictions: counters.forced_evictions.load(Ordering::Relaxed),
            creation_failures: counters.creation_failures.load(Ordering::Relaxed),
        }
    }
}

//! Background expiration scanning

use std::sync::Weak;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::config::Limits;
use crate::controller::PoolController;
use crate::entry::{EntryKey, EntryLock};
use crate::pool::PoolCore;

/// What a scan pass decides for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Retain,
    /// Expired or over its lock-count budget; reap only if unlocked.
    Evict,
    /// Held locked past `max_lock_time`; reap regardless of the holder.
    ForceEvict,
}

/// Limits captured once per pass, so one sweep applies one consistent policy
/// even while setters race with it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpiryLimits {
    pub(crate) max_age: Option<Duration>,
    pub(crate) max_idle_time: Option<Duration>,
    pub(crate) max_lock_count: Option<u64>,
    pub(crate) max_lock_time: Option<Duration>,
}

impl ExpiryLimits {
    pub(crate) fn capture(limits: &Limits) -> Self {
        Self {
            max_age: limits.max_age(),
            max_idle_time: limits.max_idle_time(),
            max_lock_count: limits.max_lock_count(),
            max_lock_time: limits.max_lock_time(),
        }
    }
}

/// Classify one entry. For a locked entry the idle clock measures how long
/// the current checkout has been held.
pub(crate) fn classify(now: Instant, lock: &EntryLock, limits: &ExpiryLimits) -> Disposition {
    let idle = lock.idle(now);

    if lock.is_locked() && limits.max_lock_time.is_some_and(|max| idle > max) {
        return Disposition::ForceEvict;
    }

    let expired_age = limits.max_age.is_some_and(|max| lock.age(now) > max);
    let expired_idle = limits.max_idle_time.is_some_and(|max| idle > max);
    let over_count = limits.max_lock_count.is_some_and(|max| lock.lock_count() > max);

    if expired_age || expired_idle || over_count {
        Disposition::Evict
    } else {
        Disposition::Retain
    }
}

/// Spawn the periodic scanner. The task holds only a weak reference to the
/// pool, so an abandoned pool winds down on its own; explicit shutdown goes
/// through the cancellation token and joins the task.
pub(crate) fn spawn<C: PoolController>(
    core: Weak<PoolCore<C>>,
    token: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("expiration scanner stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }
            let Some(core) = core.upgrade() else { break };
            sweep(&core).await;
        }
    })
}

/// One scan pass. Dispositions are computed over a snapshot and then applied
/// entry by entry with the same primitives caller-initiated destroys use, so
/// a pass never blocks unrelated pool operations.
pub(crate) async fn sweep<C: PoolController>(core: &PoolCore<C>) {
    let limits = ExpiryLimits::capture(&core.limits);
    let now = Instant::now();

    let mut doomed: Vec<(EntryKey, bool)> = Vec::new();
    for entry in core.entries.iter() {
        match classify(now, &entry.lock, &limits) {
            Disposition::Retain => {}
            Disposition::Evict => doomed.push((*entry.key(), false)),
            Disposition::ForceEvict => doomed.push((*entry.key(), true)),
        }
    }
    if doomed.is_empty() {
        trace!("scan pass found nothing to evict");
        return;
    }

    for (key, force) in doomed {
        match core.destroy_entry(key, force).await {
            Ok(true) => {
                core.stats.expired.fetch_add(1, Ordering::Relaxed);
                if force {
                    core.stats.forced_evictions.fetch_add(1, Ordering::Relaxed);
                }
                debug!(key = %key, force, "evicted expired entry");
            }
            // Locked again or already gone; the next pass decides.
            Ok(false) => {}
            Err(err) => {
                error!(key = %key, error = %err, "destroy hook failed during eviction");
            }
        }
    }
}

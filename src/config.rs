//! Pool configuration

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Configuration for pool behavior, set at construction.
///
/// The expiry limits (`max_age`, `max_idle_time`, `max_lock_count`,
/// `max_lock_time`) and `max_pool_size` can also be adjusted later through
/// the pool's setters; the rest is fixed for the pool's lifetime.
///
/// # Examples
///
/// ```
/// use repool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_pool_size(32)
///     .with_max_idle_time(Duration::from_secs(300))
///     .with_scan_interval(Duration::from_secs(5));
///
/// assert_eq!(config.max_pool_size, 32);
/// assert_eq!(config.max_idle_time, Some(Duration::from_secs(300)));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of entries the pool may hold at once.
    pub max_pool_size: usize,

    /// Evict entries older than this, regardless of use. `None` disables.
    pub max_age: Option<Duration>,

    /// Evict entries unlocked for longer than this. `None` disables.
    pub max_idle_time: Option<Duration>,

    /// Evict entries locked more than this many times. `None` disables.
    pub max_lock_count: Option<u64>,

    /// Force-evict entries held locked for longer than this (stuck-checkout
    /// reclamation). `None` disables.
    pub max_lock_time: Option<Duration>,

    /// Period of the background expiration scanner.
    pub scan_interval: Duration,

    /// Deadline used by [`Pool::acquire_wait`](crate::Pool::acquire_wait).
    pub wait_timeout: Duration,

    /// How many consecutive creation failures `acquire` rides out with
    /// backoff sleeps before handing the failure to the caller.
    pub create_retry_limit: usize,

    /// Delay schedule between creation retries.
    pub backoff: BackoffPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            max_age: None,
            max_idle_time: None,
            max_lock_count: None,
            max_lock_time: None,
            scan_interval: Duration::from_secs(15),
            wait_timeout: Duration::from_secs(15),
            create_retry_limit: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_max_idle_time(mut self, max_idle: Duration) -> Self {
        self.max_idle_time = Some(max_idle);
        self
    }

    pub fn with_max_lock_count(mut self, count: u64) -> Self {
        self.max_lock_count = Some(count);
        self
    }

    pub fn with_max_lock_time(mut self, max_lock: Duration) -> Self {
        self.max_lock_time = Some(max_lock);
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_create_retry_limit(mut self, retries: usize) -> Self {
        self.create_retry_limit = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Runtime-tunable subset of the configuration, shared between callers and
/// the scanner. A zero millisecond/count value means the limit is off, so a
/// `Some(Duration::ZERO)` setter call disables rather than evicts everything.
#[derive(Debug)]
pub(crate) struct Limits {
    max_pool_size: AtomicUsize,
    max_age_ms: AtomicU64,
    max_idle_ms: AtomicU64,
    max_lock_count: AtomicU64,
    max_lock_time_ms: AtomicU64,
}

fn to_ms(value: Option<Duration>) -> u64 {
    value.map_or(0, |d| d.as_millis() as u64)
}

fn from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Limits {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        Self {
            max_pool_size: AtomicUsize::new(config.max_pool_size),
            max_age_ms: AtomicU64::new(to_ms(config.max_age)),
            max_idle_ms: AtomicU64::new(to_ms(config.max_idle_time)),
            max_lock_count: AtomicU64::new(config.max_lock_count.unwrap_or(0)),
            max_lock_time_ms: AtomicU64::new(to_ms(config.max_lock_time)),
        }
    }

    pub(crate) fn max_pool_size(&self) -> usize {
        self.max_pool_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_pool_size(&self, size: usize) {
        self.max_pool_size.store(size, Ordering::Relaxed);
    }

    pub(crate) fn max_age(&self) -> Option<Duration> {
        from_ms(self.max_age_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn set_max_age(&self, value: Option<Duration>) {
        self.max_age_ms.store(to_ms(value), Ordering::Relaxed);
    }

    pub(crate) fn max_idle_time(&self) -> Option<Duration> {
        from_ms(self.max_idle_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn set_max_idle_time(&self, value: Option<Duration>) {
        self.max_idle_ms.store(to_ms(value), Ordering::Relaxed);
    }

    pub(crate) fn max_lock_count(&self) -> Option<u64> {
        let count = self.max_lock_count.load(Ordering::Relaxed);
        (count > 0).then_some(count)
    }

    pub(crate) fn set_max_lock_count(&self, value: Option<u64>) {
        self.max_lock_count.store(value.unwrap_or(0), Ordering::Relaxed);
    }

    pub(crate) fn max_lock_time(&self) -> Option<Duration> {
        from_ms(self.max_lock_time_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn set_max_lock_time(&self, value: Option<Duration>) {
        self.max_lock_time_ms.store(to_ms(value), Ordering::Relaxed);
    }
}

//! Pool statistics collection and export

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

/// Point-in-time statistics snapshot of a pool.
///
/// Combines lifetime counters with the observed extremes across the current
/// entries (the observability getters on [`Pool`](crate::Pool) expose the
/// same values individually).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolStats {
    /// Entries currently in the pool.
    pub size: usize,
    /// Entries currently checked out.
    pub locked: usize,
    /// Configured capacity at snapshot time.
    pub max_pool_size: usize,
    /// Age of the oldest current entry.
    pub oldest_age: Duration,
    /// Longest idle time among currently unlocked entries.
    pub longest_idle: Duration,
    /// Highest lock count among current entries.
    pub highest_lock_count: u64,
    /// Successful checkouts over the pool's lifetime.
    pub total_acquired: u64,
    /// Checkouts returned over the pool's lifetime.
    pub total_released: u64,
    /// Resources created by the controller.
    pub total_created: u64,
    /// Entries destroyed (any path).
    pub total_destroyed: u64,
    /// Entries reaped by the expiration scanner.
    pub total_expired: u64,
    /// Stuck checkouts force-evicted by the scanner.
    pub forced_evictions: u64,
    /// Creation hook failures.
    pub creation_failures: u64,
}

impl PoolStats {
    /// Export the snapshot as a flat string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        out.insert("size".to_string(), self.size.to_string());
        out.insert("locked".to_string(), self.locked.to_string());
        out.insert("max_pool_size".to_string(), self.max_pool_size.to_string());
        out.insert("oldest_age_ms".to_string(), self.oldest_age.as_millis().to_string());
        out.insert("longest_idle_ms".to_string(), self.longest_idle.as_millis().to_string());
        out.insert(
            "highest_lock_count".to_string(),
            self.highest_lock_count.to_string(),
        );
        out.insert("total_acquired".to_string(), self.total_acquired.to_string());
        out.insert("total_released".to_string(), self.total_released.to_string());
        out.insert("total_created".to_string(), self.total_created.to_string());
        out.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        out.insert("total_expired".to_string(), self.total_expired.to_string());
        out.insert("forced_evictions".to_string(), self.forced_evictions.to_string());
        out.insert(
            "creation_failures".to_string(),
            self.creation_failures.to_string(),
        );
        out
    }

    /// Render the snapshot in Prometheus exposition format.
    pub fn render_prometheus(&self, pool_name: &str) -> String {
        let label = format!("pool=\"{pool_name}\"");
        let mut out = String::new();
        let mut metric = |name: &str, kind: &str, help: &str, value: String| {
            out.push_str(&format!("# HELP {name} {help}\n"));
            out.push_str(&format!("# TYPE {name} {kind}\n"));
            out.push_str(&format!("{name}{{{label}}} {value}\n"));
        };

        metric(
            "repool_entries",
            "gauge",
            "Entries currently pooled",
            self.size.to_string(),
        );
        metric(
            "repool_entries_locked",
            "gauge",
            "Entries currently checked out",
            self.locked.to_string(),
        );
        metric(
            "repool_acquired_total",
            "counter",
            "Successful checkouts",
            self.total_acquired.to_string(),
        );
        metric(
            "repool_released_total",
            "counter",
            "Checkouts returned",
            self.total_released.to_string(),
        );
        metric(
            "repool_created_total",
            "counter",
            "Resources created",
            self.total_created.to_string(),
        );
        metric(
            "repool_destroyed_total",
            "counter",
            "Entries destroyed",
            self.total_destroyed.to_string(),
        );
        metric(
            "repool_expired_total",
            "counter",
            "Entries reaped by the scanner",
            self.total_expired.to_string(),
        );
        metric(
            "repool_forced_evictions_total",
            "counter",
            "Stuck checkouts force-evicted",
            self.forced_evictions.to_string(),
        );
        metric(
            "repool_creation_failures_total",
            "counter",
            "Creation hook failures",
            self.creation_failures.to_string(),
        );
        out
    }
}

/// Lifetime counters, bumped on the pool's hot paths with relaxed ordering.
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    pub(crate) acquired: AtomicU64,
    pub(crate) released: AtomicU64,
    pub(crate) created: AtomicU64,
    pub(crate) destroyed: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) forced_evictions: AtomicU64,
    pub(crate) creation_failures: AtomicU64,
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use repool::{ControllerError, Pool, PoolConfig, PoolController, PoolError};
use tokio::time::Instant;

// Once-guarded tracing init, suitable for `cargo test`.
fn init_tracing() {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Hands out 1, 2, 3, ... and counts destroy-hook invocations.
#[derive(Default)]
struct Sequence {
    next: AtomicU64,
    destroys: Arc<AtomicU64>,
}

impl Sequence {
    /// The controller plus a probe onto its destroy-hook counter.
    fn tracked() -> (Self, Arc<AtomicU64>) {
        let controller = Self::default();
        let probe = controller.destroys.clone();
        (controller, probe)
    }
}

#[async_trait]
impl PoolController for Sequence {
    type Resource = u64;

    async fn on_create(&self) -> Result<u64, ControllerError> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn on_destroy(&self, _resource: &u64) -> Result<(), ControllerError> {
        self.destroys.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Fails the first `n` creations, then behaves like `Sequence`.
struct Flaky {
    failures_left: AtomicI64,
    next: AtomicU64,
}

impl Flaky {
    fn failing(n: i64) -> Self {
        Self {
            failures_left: AtomicI64::new(n),
            next: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PoolController for Flaky {
    type Resource = u64;

    async fn on_create(&self) -> Result<u64, ControllerError> {
        if self.failures_left.fetch_sub(1, Ordering::Relaxed) > 0 {
            return Err("backend unavailable".into());
        }
        Ok(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn on_destroy(&self, _resource: &u64) -> Result<(), ControllerError> {
        Ok(())
    }
}

/// Creates fine, never tears down cleanly.
#[derive(Default)]
struct BrokenDestroy {
    next: AtomicU64,
}

#[async_trait]
impl PoolController for BrokenDestroy {
    type Resource = u64;

    async fn on_create(&self) -> Result<u64, ControllerError> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn on_destroy(&self, _resource: &u64) -> Result<(), ControllerError> {
        Err("close failed".into())
    }
}

fn pool_of(max: usize) -> Pool<Sequence> {
    Pool::new(Sequence::default(), PoolConfig::new().with_max_pool_size(max))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_holder_per_resource() {
    init_tracing();
    let pool = pool_of(1);
    let busy = Arc::new(AtomicBool::new(false));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let busy = busy.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                let handle = pool
                    .acquire_wait_for(Duration::from_secs(10))
                    .await
                    .expect("checkout within deadline");
                assert!(
                    !busy.swap(true, Ordering::SeqCst),
                    "two holders of the same resource"
                );
                tokio::time::sleep(Duration::from_millis(1)).await;
                busy.store(false, Ordering::SeqCst);
                assert!(pool.release(handle));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(pool.size(), 1);
    assert_eq!(pool.locked_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creators_never_exceed_capacity() {
    init_tracing();
    let pool = pool_of(3);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move { pool.acquire().await.ok() }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        if let Some(handle) = task.await.unwrap() {
            handles.push(handle);
        }
    }

    assert_eq!(handles.len(), 3, "exactly max_pool_size checkouts succeed");
    assert_eq!(pool.size(), 3);
    for handle in handles {
        assert!(pool.release(handle));
    }
}

#[tokio::test]
async fn lock_count_increments_only_on_successful_checkout() {
    init_tracing();
    let pool = pool_of(1);

    let first = pool.acquire().await.unwrap();
    assert_eq!(pool.highest_lock_count(), 1);

    // Contended attempt: the only entry is locked and the pool is full.
    match pool.acquire().await {
        Err(PoolError::CapacityExceeded) => {}
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert_eq!(pool.highest_lock_count(), 1, "failed attempt must not count");

    assert!(pool.release(first));
    let again = pool.acquire().await.unwrap();
    assert_eq!(pool.highest_lock_count(), 2);
    drop(again);
}

#[tokio::test]
async fn capacity_scenario_reuses_released_entries() {
    init_tracing();
    let pool = pool_of(2);

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_eq!((*first, *second), (1, 2));

    match pool.acquire().await {
        Err(PoolError::CapacityExceeded) => {}
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }

    assert!(pool.release(first));
    let reused = pool.acquire().await.unwrap();
    assert_eq!(*reused, 1, "released entry is reused, not a fresh resource 3");
    assert_eq!(pool.highest_lock_count(), 2);
    assert!(pool.release(reused));
    assert!(pool.release(second));
}

#[tokio::test]
async fn release_of_unknown_handle_is_soft_false() {
    init_tracing();
    let pool = pool_of(2);

    let mut handle = pool.acquire().await.unwrap();
    assert!(pool.destroy(&mut handle, true).await.unwrap());
    assert_eq!(pool.size(), 0);

    assert!(!pool.release(handle), "handle no longer belongs to the pool");
    assert_eq!(pool.stats().total_released, 0);
}

#[tokio::test]
async fn destroy_respects_the_lock_unless_forced() {
    init_tracing();
    let (controller, destroys) = Sequence::tracked();
    let pool = Pool::new(controller, PoolConfig::new().with_max_pool_size(2));

    let mut handle = pool.acquire().await.unwrap();

    assert!(!pool.destroy(&mut handle, false).await.unwrap());
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.locked_count(), 1, "refused destroy leaves the entry untouched");
    assert_eq!(destroys.load(Ordering::Relaxed), 0);

    assert!(pool.destroy(&mut handle, true).await.unwrap());
    assert_eq!(pool.size(), 0);

    // Second destroy of the same handle: no longer a member.
    assert!(!pool.destroy(&mut handle, true).await.unwrap());
    assert_eq!(destroys.load(Ordering::Relaxed), 1, "destroy hook ran exactly once");
}

#[tokio::test]
async fn destroy_all_skips_checked_out_entries() {
    init_tracing();
    let pool = pool_of(2);

    let held = pool.acquire().await.unwrap();
    let released = pool.acquire().await.unwrap();
    assert!(pool.release(released));

    assert_eq!(pool.destroy_all().await.unwrap(), 1);
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.locked_count(), 1);
    assert!(pool.release(held));
}

#[tokio::test]
async fn shutdown_disables_creation() {
    init_tracing();
    let pool = pool_of(2);
    pool.shutdown().await.unwrap();

    match pool.acquire().await {
        Err(PoolError::CreationDisabled) => {}
        other => panic!("expected CreationDisabled, got {other:?}"),
    }
}

// Deliberate, preserved behavior: shutdown never yanks live checkouts.
#[tokio::test]
async fn shutdown_leaves_checked_out_entries_alive() {
    init_tracing();
    let pool = pool_of(2);

    let held = pool.acquire().await.unwrap();
    let idle = pool.acquire().await.unwrap();
    assert!(pool.release(idle));

    assert_eq!(pool.shutdown().await.unwrap(), 1, "only the idle entry dies");
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.locked_count(), 1);

    // The holder winds the leftover down manually.
    assert!(pool.release(held));
    assert_eq!(pool.destroy_all().await.unwrap(), 1);
    assert_eq!(pool.size(), 0);
}

#[tokio::test(start_paused = true)]
async fn idle_entries_are_evicted_by_the_scanner() {
    init_tracing();
    let (controller, destroys) = Sequence::tracked();
    let pool = Pool::new(
        controller,
        PoolConfig::new()
            .with_max_pool_size(4)
            .with_max_idle_time(Duration::from_millis(50))
            .with_scan_interval(Duration::from_millis(100)),
    );

    let handle = pool.acquire().await.unwrap();
    assert!(pool.release(handle));
    assert_eq!(pool.size(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(pool.size(), 0);
    assert_eq!(pool.stats().total_expired, 1);
    assert_eq!(destroys.load(Ordering::Relaxed), 1, "destroy hook ran exactly once");
}

#[tokio::test(start_paused = true)]
async fn expired_but_held_entries_survive_until_released() {
    init_tracing();
    let pool = Pool::new(
        Sequence::default(),
        PoolConfig::new()
            .with_max_pool_size(4)
            .with_max_age(Duration::from_millis(50))
            .with_scan_interval(Duration::from_millis(100)),
    );

    let handle = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.size(), 1, "a held entry outlives its age limit");

    assert!(pool.release(handle));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.size(), 0, "the pass after release reaps it");
}

#[tokio::test(start_paused = true)]
async fn stuck_checkouts_are_force_reclaimed() {
    init_tracing();
    let pool = Pool::new(
        Sequence::default(),
        PoolConfig::new()
            .with_max_pool_size(4)
            .with_max_lock_time(Duration::from_millis(100))
            .with_scan_interval(Duration::from_millis(50)),
    );

    let leaked = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(pool.size(), 0, "stuck checkout reclaimed");
    assert_eq!(pool.stats().forced_evictions, 1);

    // The evicted holder's handle no longer belongs to the pool.
    assert!(!pool.release(leaked));
}

#[tokio::test(start_paused = true)]
async fn overused_entries_are_evicted() {
    init_tracing();
    let pool = Pool::new(
        Sequence::default(),
        PoolConfig::new()
            .with_max_pool_size(4)
            .with_max_lock_count(2)
            .with_scan_interval(Duration::from_millis(50)),
    );

    for _ in 0..3 {
        let handle = pool.acquire().await.unwrap();
        assert!(pool.release(handle));
    }
    assert_eq!(pool.highest_lock_count(), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.size(), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_follow_the_schedule() {
    init_tracing();
    let pool = Pool::new(
        Flaky::failing(3),
        PoolConfig::new().with_max_pool_size(2),
    );

    let start = Instant::now();
    let handle = pool.acquire().await.expect("succeeds on the fourth attempt");
    let elapsed = start.elapsed();

    assert_eq!(*handle, 1);
    // 100 + 400 + 900 ms of backoff before the successful attempt.
    assert!(
        elapsed >= Duration::from_millis(1400) && elapsed < Duration::from_millis(1500),
        "unexpected total backoff: {elapsed:?}"
    );
    assert_eq!(pool.stats().creation_failures, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_backoff_advice() {
    init_tracing();
    let pool = Pool::new(
        Flaky::failing(i64::MAX),
        PoolConfig::new()
            .with_max_pool_size(2)
            .with_create_retry_limit(2),
    );

    match pool.acquire().await {
        Err(PoolError::CreationFailed {
            attempts,
            multiplier,
            delay,
            ..
        }) => {
            assert_eq!(attempts, 3, "two retries ride out failures one and two");
            assert_eq!(multiplier, 2.0);
            assert_eq!(delay, Duration::from_millis(900));
        }
        other => panic!("expected CreationFailed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn acquire_wait_times_out_when_pool_is_exhausted() {
    init_tracing();
    let pool = pool_of(1);
    let held = pool.acquire().await.unwrap();

    match pool.acquire_wait_for(Duration::from_millis(200)).await {
        Err(PoolError::AcquireTimeout(deadline)) => {
            assert_eq!(deadline, Duration::from_millis(200));
        }
        other => panic!("expected AcquireTimeout, got {other:?}"),
    }
    assert!(pool.release(held));
}

#[tokio::test(start_paused = true)]
async fn acquire_wait_picks_up_a_released_entry() {
    init_tracing();
    let pool = pool_of(1);
    let held = pool.acquire().await.unwrap();

    let releaser = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(pool.release(held));
        })
    };

    let handle = pool
        .acquire_wait_for(Duration::from_secs(1))
        .await
        .expect("hand-off from the releasing task");
    assert_eq!(*handle, 1);
    releaser.await.unwrap();
    assert!(pool.release(handle));
}

#[tokio::test]
async fn failed_destroy_hook_still_removes_the_entry() {
    init_tracing();
    let pool = Pool::new(BrokenDestroy::default(), PoolConfig::new().with_max_pool_size(2));

    let mut handle = pool.acquire().await.unwrap();
    match pool.destroy(&mut handle, true).await {
        Err(PoolError::DestroyFailed(source)) => {
            assert_eq!(source.to_string(), "close failed");
        }
        other => panic!("expected DestroyFailed, got {other:?}"),
    }
    assert_eq!(pool.size(), 0, "bookkeeping completed before the hook failed");
}

#[tokio::test]
async fn runtime_setters_round_trip_and_gate_creation() {
    init_tracing();
    let pool = pool_of(4);

    pool.set_max_age(Some(Duration::from_secs(60)));
    pool.set_max_idle_time(Some(Duration::from_secs(30)));
    pool.set_max_lock_count(Some(10));
    pool.set_max_lock_time(Some(Duration::from_secs(5)));
    assert_eq!(pool.max_age(), Some(Duration::from_secs(60)));
    assert_eq!(pool.max_idle_time(), Some(Duration::from_secs(30)));
    assert_eq!(pool.max_lock_count(), Some(10));
    assert_eq!(pool.max_lock_time(), Some(Duration::from_secs(5)));

    let first = pool.acquire().await.unwrap();
    pool.set_max_pool_size(1);
    assert_eq!(pool.max_pool_size(), 1);
    match pool.acquire().await {
        Err(PoolError::CapacityExceeded) => {}
        other => panic!("expected CapacityExceeded after shrink, got {other:?}"),
    }
    assert!(pool.release(first));
}

#[tokio::test]
async fn acquire_wait_with_default_deadline_creates_when_room_exists() {
    init_tracing();
    let pool = pool_of(2);
    let handle = pool.acquire_wait().await.expect("room to create");
    assert_eq!(*handle, 1);
    assert!(pool.release(handle));
}

#[tokio::test(start_paused = true)]
async fn observed_age_and_idle_grow_with_time() {
    init_tracing();
    let pool = pool_of(4);

    let held = pool.acquire().await.unwrap();
    let idle = pool.acquire().await.unwrap();
    assert!(pool.release(idle));

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(pool.oldest_age() >= Duration::from_millis(120));
    assert!(pool.longest_idle() >= Duration::from_millis(120));
    assert_eq!(pool.locked_count(), 1);

    // Only unlocked entries count toward idle time.
    assert_eq!(pool.destroy_all().await.unwrap(), 1);
    assert_eq!(pool.longest_idle(), Duration::ZERO);
    assert!(pool.oldest_age() >= Duration::from_millis(120));

    assert!(pool.release(held));
}

#[tokio::test]
async fn stats_track_the_lifecycle() {
    init_tracing();
    let pool = pool_of(2);

    let first = pool.acquire().await.unwrap();
    assert!(pool.release(first));
    let mut second = pool.acquire().await.unwrap();
    assert!(pool.destroy(&mut second, true).await.unwrap());

    let stats = pool.stats();
    assert_eq!(stats.total_created, 1);
    assert_eq!(stats.total_acquired, 2);
    assert_eq!(stats.total_released, 1);
    assert_eq!(stats.total_destroyed, 1);
    assert_eq!(stats.size, 0);

    let exported = stats.export();
    assert_eq!(exported.get("total_acquired").map(String::as_str), Some("2"));
}

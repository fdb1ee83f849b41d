//! Expiration scanning: idle eviction and stuck-checkout reclamation

use async_trait::async_trait;
use repool::{ControllerError, Pool, PoolConfig, PoolController};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct Sessions(AtomicU64);

#[async_trait]
impl PoolController for Sessions {
    type Resource = u64;

    async fn on_create(&self) -> Result<u64, ControllerError> {
        Ok(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn on_destroy(&self, session: &u64) -> Result<(), ControllerError> {
        println!("   [controller] tearing down session {session}");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    println!("=== repool - Eviction Example ===\n");

    let pool = Pool::new(
        Sessions::default(),
        PoolConfig::new()
            .with_max_pool_size(4)
            .with_max_idle_time(Duration::from_millis(200))
            .with_max_lock_time(Duration::from_secs(1))
            .with_scan_interval(Duration::from_millis(100)),
    );

    println!("1. Idle entries are reaped by the scanner:");
    let session = pool.acquire().await.unwrap();
    pool.release(session);
    println!("   Pool size after release: {}", pool.size());
    sleep(Duration::from_millis(500)).await;
    println!("   Pool size after idle window: {}", pool.size());

    println!("\n2. A leaked checkout is force-reclaimed after max_lock_time:");
    let leaked = pool.acquire().await.unwrap();
    println!("   Holding session {} without releasing...", *leaked);
    sleep(Duration::from_millis(1500)).await;
    println!("   Pool size after reclamation: {}", pool.size());
    println!("   Forced evictions: {}", pool.stats().forced_evictions);
    println!("   Late release accepted: {}", pool.release(leaked));

    pool.shutdown().await.unwrap();
}

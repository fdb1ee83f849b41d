//! Basic usage: checkout, release, reuse, capacity

use async_trait::async_trait;
use repool::{ControllerError, Pool, PoolConfig, PoolController, PoolError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Pretend each resource is an expensive connection, numbered in creation
/// order.
#[derive(Default)]
struct Connections(AtomicU64);

#[async_trait]
impl PoolController for Connections {
    type Resource = u64;

    async fn on_create(&self) -> Result<u64, ControllerError> {
        let id = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        println!("   [controller] opening connection {id}");
        Ok(id)
    }

    async fn on_destroy(&self, conn: &u64) -> Result<(), ControllerError> {
        println!("   [controller] closing connection {conn}");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    println!("=== repool - Basic Example ===\n");

    let pool = Pool::new(Connections::default(), PoolConfig::new().with_max_pool_size(2));

    println!("1. Checkouts create on demand:");
    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    println!("   Got connections {} and {}", *first, *second);

    println!("2. A full pool refuses instead of over-creating:");
    match pool.acquire().await {
        Err(PoolError::CapacityExceeded) => println!("   Third acquire: capacity exceeded"),
        Err(err) => println!("   Unexpected error: {err}"),
        Ok(_) => println!("   Unexpected checkout"),
    }

    println!("3. Released entries are reused:");
    pool.release(first);
    let reused = pool.acquire().await.unwrap();
    println!("   Got connection {} again (lock count {})", *reused, pool.highest_lock_count());

    println!("4. Stats:");
    for (key, value) in pool.stats().export() {
        println!("   {key}: {value}");
    }

    pool.release(reused);
    pool.release(second);
    let destroyed = pool.shutdown().await.unwrap();
    println!("\nShut down, destroyed {destroyed} idle entries");
}

//! # repool
//!
//! A generic, bounded pool of reusable, expensive-to-construct resources:
//! exclusive checkouts for concurrent callers, reclamation on release, and
//! automatic eviction by age, idle time, usage count, or stuck-checkout
//! duration.
//!
//! ## Features
//!
//! - Exclusive checkouts guarded by per-entry atomic lock transitions
//! - Automatic checkout return via RAII (`Drop`), plus explicit
//!   release/destroy with soft failure on unknown handles
//! - On-demand creation through a [`PoolController`], with exponential
//!   backoff between creation retries
//! - Background expiration scanner with synchronous shutdown
//! - Runtime-tunable limits and a statistics snapshot with Prometheus export
//!
//! ## Quick start
//!
//! ```
//! use async_trait::async_trait;
//! use repool::{ControllerError, Pool, PoolConfig, PoolController};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! #[derive(Default)]
//! struct Connections(AtomicU64);
//!
//! #[async_trait]
//! impl PoolController for Connections {
//!     type Resource = u64;
//!
//!     async fn on_create(&self) -> Result<u64, ControllerError> {
//!         Ok(self.0.fetch_add(1, Ordering::Relaxed) + 1)
//!     }
//!
//!     async fn on_destroy(&self, _conn: &u64) -> Result<(), ControllerError> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = Pool::new(Connections::default(), PoolConfig::new().with_max_pool_size(4));
//!
//! let conn = pool.acquire().await.unwrap();
//! assert_eq!(*conn, 1);
//! pool.release(conn);
//!
//! pool.shutdown().await.unwrap();
//! # }
//! ```

mod backoff;
mod config;
mod controller;
mod entry;
mod errors;
mod metrics;
mod pool;
mod scanner;

pub use backoff::{BackoffPolicy, MAX_BACKOFF_COUNT};
pub use config::PoolConfig;
pub use controller::PoolController;
pub use entry::EntryKey;
pub use errors::{ControllerError, PoolError, PoolResult};
pub use metrics::PoolStats;
pub use pool::{Pool, Pooled};

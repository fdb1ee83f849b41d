//! Error types for the resource pool

use std::time::Duration;
use thiserror::Error;

/// Error type produced by [`PoolController`](crate::PoolController) hooks.
///
/// The pool never inspects the failure beyond carrying it as a source; any
/// boxed error will do.
pub type ControllerError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    /// Creation refused because the pool already holds `max_pool_size`
    /// entries. Recoverable; callers may wait for a release and retry.
    #[error("pool is at maximum capacity")]
    CapacityExceeded,

    /// Creation attempted after [`Pool::shutdown`](crate::Pool::shutdown).
    /// Not recoverable for this pool instance.
    #[error("pool is not accepting new resources")]
    CreationDisabled,

    /// The controller's create hook failed. Carries the backoff advice the
    /// pool used between its own retries; callers continuing the schedule
    /// themselves should sleep for `delay` before the next attempt.
    #[error("resource creation failed ({attempts} consecutive), retry after {delay:?}")]
    CreationFailed {
        /// Consecutive-failure count, capped at the backoff ceiling.
        attempts: u32,
        /// Exponent applied to the failure count.
        multiplier: f64,
        /// Computed delay before the next attempt.
        delay: Duration,
        #[source]
        source: ControllerError,
    },

    /// No checkout became available within the wait deadline.
    #[error("no resource became available within {0:?}")]
    AcquireTimeout(Duration),

    /// The controller's destroy hook failed. Fatal for the entry: it has
    /// already been removed from the pool and cannot be re-inserted.
    #[error("failed to destroy pooled resource")]
    DestroyFailed(#[source] ControllerError),
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_failed_display_mentions_delay() {
        let err = PoolError::CreationFailed {
            attempts: 3,
            multiplier: 2.0,
            delay: Duration::from_millis(900),
            source: "connect refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("3 consecutive"), "got: {text}");
        assert!(text.contains("900ms"), "got: {text}");
    }

    #[test]
    fn destroy_failed_preserves_source() {
        let err = PoolError::DestroyFailed("close failed".into());
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "close failed");
    }
}

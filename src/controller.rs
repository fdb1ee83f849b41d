//! The controller contract: how pooled resources come and go

use async_trait::async_trait;

use crate::errors::ControllerError;

/// Lifecycle hooks for the resources a [`Pool`](crate::Pool) manages.
///
/// The pool treats the resource as opaque: it is created by [`on_create`],
/// handed out behind an `Arc`, and torn down by [`on_destroy`] after the pool
/// has already dropped its own record of it. Implementations must be safe to
/// call from multiple tasks at once.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use repool::{ControllerError, PoolController};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct Sequence(AtomicU64);
///
/// #[async_trait]
/// impl PoolController for Sequence {
///     type Resource = u64;
///
///     async fn on_create(&self) -> Result<u64, ControllerError> {
///         Ok(self.0.fetch_add(1, Ordering::Relaxed) + 1)
///     }
///
///     async fn on_destroy(&self, _resource: &u64) -> Result<(), ControllerError> {
///         Ok(())
///     }
/// }
/// ```
///
/// [`on_create`]: PoolController::on_create
/// [`on_destroy`]: PoolController::on_destroy
#[async_trait]
pub trait PoolController: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + Sync + 'static;

    /// Produce a new resource. A failure here feeds the pool's backoff
    /// schedule; the next success resets it.
    async fn on_create(&self) -> Result<Self::Resource, ControllerError>;

    /// Tear a resource down. Called exactly once per destroyed entry, after
    /// the entry has been removed from the pool; a failure is surfaced to the
    /// destroyer as [`PoolError::DestroyFailed`](crate::PoolError::DestroyFailed).
    async fn on_destroy(&self, resource: &Self::Resource) -> Result<(), ControllerError>;
}

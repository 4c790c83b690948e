//! Runtime adapters: the spawn abstraction and its tokio implementation.

pub mod tokio_spawner;

use std::future::Future;
use std::pin::Pin;

pub use tokio_spawner::TokioSpawner;

/// A boxed future as accepted by [`Spawn`].
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Abstraction for spawning task execution on an async runtime.
///
/// Object-safe so workers and the scheduler can share one
/// `Arc<dyn Spawn>` instead of threading a runtime generic through
/// every type.
pub trait Spawn: Send + Sync + 'static {
    /// Spawn a future to run to completion in the background.
    fn spawn(&self, fut: BoxFuture);
}

//! Task spawning abstraction.
//!
//! The discovery engine tracks its own loops, but description fetches run
//! detached on the runtime handle held by a [`TokioSpawner`].

use std::future::Future;

/// Abstraction for spawning detached background tasks.
///
/// # Example
///
/// ```ignore
/// let spawner = TokioSpawner::current();
/// spawner.spawn(async move {
///     let _ = fetcher.fetch(&location).await;
/// });
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future that runs to completion independently of the caller.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Spawner backed by a Tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

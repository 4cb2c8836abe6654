//! Task spawning abstraction for runtime independence.
//!
//! The relay runs one worker task plus one read loop per live decode session.
//! Both are spawned through [`TaskSpawner`] so embedders can route them onto a
//! runtime of their choosing (a dedicated I/O runtime, a test runtime, ...).

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Tasks are fire-and-forget: the relay tracks their lifetime through
/// cancellation tokens and channels, never through join handles.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
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

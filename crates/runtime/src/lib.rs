//! The `Runtime` abstraction every stage worker and the wait pool are
//! written against, so the pipeline core can be driven by a real tokio
//! runtime in production and by the exact same tokio runtime (just without
//! wall-clock sleeps standing between test steps) under `#[tokio::test]`.

use std::{
    future::Future,
    time::{
        Duration,
        Instant,
        SystemTime,
    },
};

use futures::future::BoxFuture;
use rand::rngs::ThreadRng;

pub mod backoff;
pub mod prod;
pub mod testing;

pub use backoff::Backoff;
pub use prod::ProdRuntime;
pub use testing::TestRuntime;

/// Why a spawned task stopped running.
#[derive(Debug)]
pub enum JoinError {
    /// The task was asked to shut down and did.
    Canceled,
    /// The task panicked or otherwise failed.
    Panicked(anyhow::Error),
}

/// A handle to a spawned task that can be asked to stop and then waited on.
/// Object-safe so callers can hold a `Box<dyn SpawnHandle>` without naming
/// the concrete future type `spawn` produced.
pub trait SpawnHandle: Send {
    /// Signal the task to stop. Idempotent; does not wait for the task to
    /// actually exit.
    fn shutdown(&mut self);

    /// Wait for the task to exit, returning how it stopped.
    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>>;
}

/// Ask a task to shut down and wait for it to exit, treating a clean
/// cancellation the same as a clean return. Every worker's `shutdown` method
/// is built on top of this.
pub async fn shutdown_and_join(mut handle: Box<dyn SpawnHandle>) -> anyhow::Result<()> {
    handle.shutdown();
    match handle.join().await {
        Ok(()) | Err(JoinError::Canceled) => Ok(()),
        Err(JoinError::Panicked(e)) => Err(e),
    }
}

/// Abstraction over "the outside world" (wall clock, task spawning,
/// randomness) so the pipeline can be exercised deterministically in tests.
/// Grounded on the same seams Convex's backend draws around `tokio`, trimmed
/// to what this pipeline actually needs (no HTTP client, no heap-size
/// tracking, no task monitor registry).
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Sleep for `duration`, yielding to other tasks meanwhile.
    fn wait(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Spawn `f` as a new background task named `name` (used only for
    /// logging/diagnostics), returning a handle that can cancel and join it.
    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle>;

    /// The current wall-clock time.
    fn system_time(&self) -> SystemTime;

    /// A monotonic instant, usable for measuring elapsed durations.
    fn monotonic_now(&self) -> Instant;

    /// Run `f` against this runtime's source of randomness.
    fn with_rng<R>(&self, f: impl FnOnce(&mut ThreadRng) -> R) -> R;
}

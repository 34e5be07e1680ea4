//! A [`crate::Runtime`] for use under `#[tokio::test]`. Identical to
//! [`crate::prod::ProdRuntime`] in behavior -- it still sleeps in wall-clock
//! time -- but it binds to the ambient tokio runtime a test function is
//! already running on instead of requiring its own.

use std::{
    future::Future,
    time::{
        Duration,
        Instant,
        SystemTime,
    },
};

use futures::{
    future::BoxFuture,
    FutureExt,
};
use rand::rngs::ThreadRng;
use tokio::{
    runtime::Handle,
    time::sleep,
};

use crate::{
    prod::FutureHandle,
    Runtime,
    SpawnHandle,
};

#[derive(Clone)]
pub struct TestRuntime {
    handle: Handle,
}

impl TestRuntime {
    /// Must be called from within a tokio context (e.g. `#[tokio::test]`).
    pub fn new() -> Self {
        Self {
            handle: Handle::current(),
        }
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for TestRuntime {
    fn wait(&self, duration: Duration) -> BoxFuture<'static, ()> {
        sleep(duration).boxed()
    }

    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        tracing::debug!(task = name, "spawning (test runtime)");
        let handle = self.handle.spawn(f);
        Box::new(FutureHandle { handle })
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut ThreadRng) -> R) -> R {
        let mut rng = rand::thread_rng();
        f(&mut rng)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn spawn_and_shutdown() {
        let runtime = TestRuntime::new();
        let handle = runtime.spawn("test-task", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let result = crate::shutdown_and_join(handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_returns() {
        let runtime = TestRuntime::new();
        runtime.wait(Duration::from_millis(1)).await;
    }
}

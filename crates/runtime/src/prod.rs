//! Production implementation of [`crate::Runtime`], backed directly by
//! tokio with no mocking seam.

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
    runtime::{
        Builder,
        Handle as TokioHandle,
        Runtime as TokioRuntime,
    },
    time::sleep,
};

use crate::{
    JoinError,
    Runtime,
    SpawnHandle,
};

pub struct FutureHandle {
    pub(crate) handle: tokio::task::JoinHandle<()>,
}

impl SpawnHandle for FutureHandle {
    fn shutdown(&mut self) {
        self.handle.abort();
    }

    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>> {
        async move {
            match (&mut self.handle).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_cancelled() => Err(JoinError::Canceled),
                Err(e) => Err(JoinError::Panicked(anyhow::anyhow!("{e}"))),
            }
        }
        .boxed()
    }
}

/// Runtime for running for real: sleeps in wall-clock time and spawns onto a
/// shared tokio multi-thread runtime.
#[derive(Clone)]
pub struct ProdRuntime {
    handle: TokioHandle,
}

impl ProdRuntime {
    /// Build the underlying tokio runtime. Call once from `main`; the
    /// returned `TokioRuntime` must outlive every `ProdRuntime` handed out
    /// from it.
    pub fn init_tokio() -> anyhow::Result<TokioRuntime> {
        assert!(
            TokioHandle::try_current().is_err(),
            "Tried to create a ProdRuntime from within a Tokio context. Are you using \
             #[tokio::main]?"
        );
        let tokio_rt = Builder::new_multi_thread().enable_all().build()?;
        Ok(tokio_rt)
    }

    pub fn new(tokio_rt: &TokioRuntime) -> Self {
        Self {
            handle: tokio_rt.handle().clone(),
        }
    }

    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.handle.block_on(f)
    }
}

impl Runtime for ProdRuntime {
    fn wait(&self, duration: Duration) -> BoxFuture<'static, ()> {
        sleep(duration).boxed()
    }

    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        tracing::debug!(task = name, "spawning");
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

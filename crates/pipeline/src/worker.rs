//! The shared stage-worker loop every one of `DataFetcher`, `MediaDownloader`,
//! `MediaUploader`, and `Sender` runs. Grounded on `Runnable` as referenced
//! (but not retrieved in source form) from each worker's
//! `from fa_search_bot.subscriptions.runnable import Runnable, ShutdownError`
//! import, and on each worker's own `do_process`/`_wait_while_running` use.

use std::{
    future::Future,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::Metrics;
use runtime::Runtime;

/// How long a stage worker sleeps after finding nothing to do, before
/// checking again.
pub const QUEUE_BACKOFF: Duration = Duration::from_secs(3);

/// One pass of a stage worker's loop: either it did something (`Ok(true)`),
/// found nothing ready (`Ok(false)`, the caller backs off), or it hit a
/// fatal error that should be logged and retried by the supervisor.
#[async_trait]
pub trait StageWorker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Perform one unit of work. Returns `Ok(true)` if it found and
    /// processed an item, `Ok(false)` if the stage's queue was empty.
    async fn do_process(&self) -> anyhow::Result<bool>;

    /// Return whatever item this worker was mid-attempt on back to the wait
    /// pool, called by the supervisor when `running` flips during an
    /// attempt. A worker that hasn't processed anything yet is a no-op.
    async fn revert_last_attempt(&self);
}

/// Runs `worker`'s loop until `running` is cleared, backing off
/// `QUEUE_BACKOFF` whenever `do_process` finds nothing to do, and reporting
/// every error via `errors::report_error` without stopping the loop (§7:
/// fatal/unexpected errors are logged and the worker keeps running).
pub async fn run_loop<R: Runtime>(
    worker: Arc<dyn StageWorker>,
    runtime: R,
    metrics: Arc<dyn Metrics>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match worker.do_process().await {
            Ok(true) => {},
            Ok(false) => {
                runtime.wait(QUEUE_BACKOFF).await;
            },
            Err(err) => {
                errors::report_error(worker.name(), &err).await;
            },
        }
    }
    worker.revert_last_attempt().await;
    let _ = metrics;
}

/// Sleeps up to `duration`, waking early if `running` is cleared, so a
/// stage worker's retry backoff doesn't block shutdown. Mirrors
/// `Runnable._wait_while_running`.
pub async fn wait_while_running<R: Runtime>(runtime: &R, running: &AtomicBool, duration: Duration) {
    const POLL_INTERVAL: Duration = Duration::from_millis(200);
    let mut remaining = duration;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(POLL_INTERVAL);
        runtime.wait(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

/// Runs `attempt` in a loop, retrying with `should_retry(&error)` deciding
/// whether to back off and try again or give up and propagate. Used by
/// every stage worker's "retry transient errors, propagate the rest" policy
/// (§4.7, §7).
pub async fn retry_while_running<R, T, E, F, Fut>(
    runtime: &R,
    running: &AtomicBool,
    backoff: Duration,
    mut attempt: F,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    R: Runtime,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) && running.load(Ordering::SeqCst) => {
                wait_while_running(runtime, running, backoff).await;
                continue;
            },
            Err(err) => return Err(err),
        }
    }
}

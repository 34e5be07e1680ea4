//! The DataFetcher stage worker (§4.7). Ported from `DataFetcher` in
//! `fa_search_bot/subscriptions/media_downloader.py`'s sibling module of the
//! same shape (the file itself wasn't retrieved into source form, but its
//! `do_process`/retry pattern is identical to `MediaDownloader.do_process`,
//! which was).

use std::{
    sync::{
        atomic::AtomicBool,
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::{
    Metrics,
    Outcome,
    Stage,
    StageTimer,
};
use parking_lot::Mutex;
use query::SubmissionID;
use runtime::Runtime;
use subscriptions::SubscriptionStore;

use crate::{
    client::SiteClient,
    wait_pool::WaitPool,
    worker::StageWorker,
};

/// How long the DataFetcher backs off after a transient site error before
/// retrying the same id.
pub const CONNECTION_BACKOFF: Duration = Duration::from_secs(20);

pub struct DataFetcher<R: Runtime> {
    wait_pool: Arc<WaitPool>,
    site_client: Arc<dyn SiteClient>,
    store: Arc<Mutex<SubscriptionStore>>,
    metrics: Arc<dyn Metrics>,
    runtime: R,
    running: Arc<AtomicBool>,
    last_processed: Mutex<Option<SubmissionID>>,
}

impl<R: Runtime> DataFetcher<R> {
    pub fn new(
        wait_pool: Arc<WaitPool>,
        site_client: Arc<dyn SiteClient>,
        store: Arc<Mutex<SubscriptionStore>>,
        metrics: Arc<dyn Metrics>,
        runtime: R,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            wait_pool,
            site_client,
            store,
            metrics,
            runtime,
            running,
            last_processed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<R: Runtime> StageWorker for DataFetcher<R> {
    fn name(&self) -> &'static str {
        "data_fetcher"
    }

    async fn do_process(&self) -> anyhow::Result<bool> {
        let Some(id) = self.wait_pool.get_next_for_data_fetch() else {
            return Ok(false);
        };
        *self.last_processed.lock() = Some(id);
        tracing::debug!(sub_id = %id, "got submission from fetch queue, fetching data");

        let mut timer = StageTimer::start(self.metrics.as_ref(), Stage::DataFetcher);
        let full_data = crate::worker::retry_while_running(
            &self.runtime,
            &self.running,
            CONNECTION_BACKOFF,
            || self.site_client.get_full_submission(id),
            |err| {
                let retry = err.status >= 500 || err.status == 0;
                if retry {
                    tracing::warn!(sub_id = %id, status = err.status, "transient error fetching submission, retrying");
                    self.metrics.record_backoff(Stage::DataFetcher, CONNECTION_BACKOFF);
                }
                retry
            },
        )
        .await;
        let full_data = match full_data {
            Ok(data) => data,
            Err(err) if err.status == 404 => {
                if self.wait_pool.is_active(id) {
                    // This is a refresh of a submission that already
                    // matched once: its metadata is gone now too, not just
                    // the media. Follow the same broken-media path as the
                    // MediaDownloader rather than silently dropping a
                    // submission subscribers were already going to receive.
                    tracing::warn!(sub_id = %id, "submission metadata disappeared during refresh");
                    match self.wait_pool.revert_data_fetch(id) {
                        Ok(()) => {
                            tracing::debug!(sub_id = %id, "requeued for another refresh attempt");
                        },
                        Err(err) if err.code == errors::ErrorCode::TooManyRefresh => {
                            tracing::warn!(sub_id = %id, "sending submission without media: {err}");
                            if !self.wait_pool.finalize_without_media(id) {
                                tracing::warn!(sub_id = %id, "no prior fetch to fall back to, dropping");
                                self.wait_pool.remove_state(id).ok();
                            }
                        },
                        Err(err) => {
                            tracing::warn!(sub_id = %id, "failed to requeue refresh: {err}");
                        },
                    }
                } else {
                    tracing::warn!(sub_id = %id, "submission metadata disappeared, dropping from wait pool");
                    self.wait_pool.remove_state(id).ok();
                }
                timer.set_outcome(Outcome::Dropped);
                return Ok(true);
            },
            Err(err) => return Err(err.into()),
        };

        let target = full_data.to_query_target();
        let matches = self.store.lock().matching_subscriptions(&target).into_iter().cloned().collect::<Vec<_>>();
        if matches.is_empty() {
            tracing::debug!(sub_id = %id, "no subscriptions matched, dropping");
            self.wait_pool.remove_state(id).ok();
            timer.set_outcome(Outcome::Dropped);
            return Ok(true);
        }
        self.wait_pool.set_fetched_data(id, full_data, matches).await;
        timer.set_outcome(Outcome::Success);
        Ok(true)
    }

    async fn revert_last_attempt(&self) {
        if let Some(id) = *self.last_processed.lock() {
            self.wait_pool.revert_data_fetch(id).ok();
        }
    }
}

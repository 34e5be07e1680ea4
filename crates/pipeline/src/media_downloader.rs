//! The MediaDownloader stage worker (§4.7), ported from `MediaDownloader` in
//! `fa_search_bot/subscriptions/media_downloader.py`.

use std::{
    sync::{
        atomic::AtomicBool,
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use errors::WatcherError;
use metrics::{
    Metrics,
    Outcome,
    Stage,
    StageTimer,
};
use parking_lot::Mutex;
use query::SubmissionID;
use runtime::Runtime;

use crate::{
    cache::SubmissionCache,
    wait_pool::WaitPool,
    worker::StageWorker,
};

pub const CONNECTION_BACKOFF: Duration = Duration::from_secs(20);

pub struct MediaDownloader<R: Runtime> {
    wait_pool: Arc<WaitPool>,
    submission_cache: Arc<dyn SubmissionCache>,
    metrics: Arc<dyn Metrics>,
    runtime: R,
    running: Arc<AtomicBool>,
    last_processed: Mutex<Option<SubmissionID>>,
}

impl<R: Runtime> MediaDownloader<R> {
    pub fn new(
        wait_pool: Arc<WaitPool>,
        submission_cache: Arc<dyn SubmissionCache>,
        metrics: Arc<dyn Metrics>,
        runtime: R,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            wait_pool,
            submission_cache,
            metrics,
            runtime,
            running,
            last_processed: Mutex::new(None),
        }
    }

    /// Re-queues `sub_id` as a refresh fetch; if that exceeds
    /// `fetch_refresh_limit`, finalizes delivery with the "no media"
    /// sentinel instead of retrying forever (mirrors `handle_deleted` in
    /// the original).
    async fn handle_media_gone(&self, sub_id: SubmissionID) {
        tracing::debug!(sub_id = %sub_id, "media disappeared before download, reverting to fetch queue");
        if let Err(err) = self.wait_pool.revert_data_fetch(sub_id) {
            if err.code == errors::ErrorCode::TooManyRefresh {
                tracing::warn!(sub_id = %sub_id, "sending submission without media: {err}");
                self.wait_pool.finalize_without_media(sub_id);
            }
        }
    }
}

#[async_trait]
impl<R: Runtime> StageWorker for MediaDownloader<R> {
    fn name(&self) -> &'static str {
        "media_downloader"
    }

    async fn do_process(&self) -> anyhow::Result<bool> {
        let Some(full_data) = self.wait_pool.get_next_for_media_download() else {
            return Ok(false);
        };
        let sub_id = full_data.sub_id();
        *self.last_processed.lock() = Some(sub_id);
        tracing::debug!(sub_id = %sub_id, "got submission from queue, downloading media");

        if let Some(cache_entry) = self.submission_cache.load_cache(sub_id).await {
            tracing::debug!(sub_id = %sub_id, "cache hit, publishing cached entry");
            self.wait_pool.set_cached(sub_id, cache_entry);
            return Ok(true);
        }

        let mut timer = StageTimer::start(self.metrics.as_ref(), Stage::MediaDownloader);
        let downloaded = crate::worker::retry_while_running(
            &self.runtime,
            &self.running,
            CONNECTION_BACKOFF,
            || full_data.download(),
            |err| {
                let retry = err.is_transient();
                if retry {
                    tracing::warn!(sub_id = %sub_id, status = err.status, "media download failed, retrying");
                    self.metrics.record_backoff(Stage::MediaDownloader, CONNECTION_BACKOFF);
                }
                retry
            },
        )
        .await;
        let downloaded = match downloaded {
            Ok(dl_file) => dl_file,
            Err(err) if err.status == 404 => {
                self.handle_media_gone(sub_id).await;
                timer.set_outcome(Outcome::Dropped);
                return Ok(true);
            },
            Err(err) => return Err(err.into()),
        };
        self.wait_pool.set_downloaded(sub_id, downloaded);
        timer.set_outcome(Outcome::Success);
        Ok(true)
    }

    async fn revert_last_attempt(&self) {
        if let Some(sub_id) = *self.last_processed.lock() {
            // A download failure mid-attempt means something may have
            // changed; re-fetch the data rather than retry the stale copy.
            let _: Result<(), WatcherError> = self.wait_pool.revert_data_fetch(sub_id);
        }
    }
}

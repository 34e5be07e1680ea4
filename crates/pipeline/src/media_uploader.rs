//! The MediaUploader stage worker (§4.7), ported from `MediaUploader` in
//! `fa_search_bot/subscriptions/media_uploader.py`.

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

use crate::{
    cache::SubmissionCache,
    client::{
        try_delete_sandbox_file,
        PlatformClient,
    },
    wait_pool::WaitPool,
    worker::StageWorker,
};

pub const CONNECTION_BACKOFF: Duration = Duration::from_secs(20);

pub struct MediaUploader<R: Runtime> {
    wait_pool: Arc<WaitPool>,
    submission_cache: Arc<dyn SubmissionCache>,
    platform: Arc<dyn PlatformClient>,
    metrics: Arc<dyn Metrics>,
    runtime: R,
    running: Arc<AtomicBool>,
    last_processed: Mutex<Option<SubmissionID>>,
}

impl<R: Runtime> MediaUploader<R> {
    pub fn new(
        wait_pool: Arc<WaitPool>,
        submission_cache: Arc<dyn SubmissionCache>,
        platform: Arc<dyn PlatformClient>,
        metrics: Arc<dyn Metrics>,
        runtime: R,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            wait_pool,
            submission_cache,
            platform,
            metrics,
            runtime,
            running,
            last_processed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<R: Runtime> StageWorker for MediaUploader<R> {
    fn name(&self) -> &'static str {
        "media_uploader"
    }

    async fn do_process(&self) -> anyhow::Result<bool> {
        let Some(sub_id) = self.wait_pool.get_next_for_media_upload() else {
            return Ok(false);
        };
        *self.last_processed.lock() = Some(sub_id);
        tracing::debug!(sub_id = %sub_id, "got submission from queue, uploading media");

        if let Some(cache_entry) = self.submission_cache.load_cache(sub_id).await {
            tracing::debug!(sub_id = %sub_id, "cache hit, publishing cached entry");
            self.wait_pool.set_cached(sub_id, cache_entry);
            return Ok(true);
        }

        let Some((full_data, dl_file, settings)) = self.wait_pool.with_state(sub_id, |state| {
            state.full_data.clone().zip(state.dl_file.clone()).map(|(fd, (f, s))| (fd, f, s))
        }).flatten() else {
            anyhow::bail!("submission {sub_id} is ready for upload but lacks data or media");
        };

        let mut timer = StageTimer::start(self.metrics.as_ref(), Stage::MediaUploader);
        let uploaded = crate::worker::retry_while_running(
            &self.runtime,
            &self.running,
            CONNECTION_BACKOFF,
            || full_data.upload_only(self.platform.as_ref(), &dl_file, &settings),
            |err| {
                let retry = matches!(err, crate::client::SendError::Other(_));
                if retry {
                    tracing::warn!(sub_id = %sub_id, "upload failed, retrying");
                    self.metrics.record_backoff(Stage::MediaUploader, CONNECTION_BACKOFF);
                }
                retry
            },
        )
        .await?;
        try_delete_sandbox_file(&dl_file.local_path);
        self.wait_pool.set_uploaded(sub_id, uploaded);
        timer.set_outcome(Outcome::Success);
        Ok(true)
    }

    async fn revert_last_attempt(&self) {
        if let Some(sub_id) = *self.last_processed.lock() {
            self.wait_pool.revert_data_fetch(sub_id).ok();
        }
    }
}

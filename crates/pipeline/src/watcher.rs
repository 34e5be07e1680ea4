//! `SubscriptionWatcher`: the aggregate root that owns the wait pool, the
//! submission cache, and every stage worker, and drives the intake loop that
//! feeds newly-discovered submissions into the pipeline. Ported from the
//! wiring implicit in `fa_search_bot`'s subscription watcher service --
//! `wait_pool.py`, `media_downloader.py`, `sender.py` et al. are all
//! constructed and supervised together, but never by a single named class in
//! the retrieved source, so this module's shape is inferred from how those
//! pieces are imported and passed to one another.

use std::{
    collections::{
        HashSet,
        VecDeque,
    },
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use metrics::{
    Metrics,
    QueueSizes,
};
use parking_lot::Mutex;
use query::SubmissionID;
use runtime::{
    Runtime,
    SpawnHandle,
};
use subscriptions::SubscriptionStore;

use crate::{
    cache::SubmissionCache,
    client::{
        PlatformClient,
        SiteClient,
    },
    data_fetcher::DataFetcher,
    media_downloader::MediaDownloader,
    media_uploader::MediaUploader,
    sender::{
        DeliveryProgress,
        Sender,
    },
    wait_pool::WaitPool,
    worker::{
        run_loop,
        wait_while_running,
        StageWorker,
    },
};

/// How often the intake loop re-polls [`SiteClient::get_browse_page`] once
/// it has exhausted the currently-known page.
pub const BROWSE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How often the wait pool's queue-depth gauges are sampled.
pub const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Worker counts and wait-pool limits, assembled by the entrypoint from
/// `WatcherConfig` (§4.11) and handed to [`SubscriptionWatcher::new`]. Kept
/// separate from the layered file/env/CLI config itself, which is a concern
/// of the binary crate, not this library.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_data_fetchers: usize,
    pub num_media_downloaders: usize,
    pub num_media_uploaders: usize,
    pub max_ready_for_upload: usize,
    pub fetch_refresh_limit: u32,
    pub browse_poll_interval: Duration,
    /// How many recently-seen submission ids the intake loop remembers, to
    /// avoid re-queuing ids it has already dispatched. Not named by the
    /// distilled spec (which leaves `latest_ids`' bound unspecified); capped
    /// here so the persisted file and process memory don't grow without
    /// limit across a long-lived watcher.
    pub seen_ids_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_data_fetchers: 2,
            num_media_downloaders: 2,
            num_media_uploaders: 1,
            max_ready_for_upload: 100,
            fetch_refresh_limit: 25,
            browse_poll_interval: BROWSE_POLL_INTERVAL,
            seen_ids_capacity: 5_000,
        }
    }
}

/// A bounded, order-preserving set of recently-seen submission ids, used by
/// the intake loop to avoid re-queuing an id it has already dispatched and
/// persisted across restarts as `latest_ids` (§6).
struct SeenIds {
    order: VecDeque<SubmissionID>,
    members: HashSet<SubmissionID>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize, initial: impl IntoIterator<Item = SubmissionID>) -> Self {
        let mut seen = Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        };
        for id in initial {
            seen.insert(id);
        }
        seen
    }

    /// Records `id`, evicting the oldest entry if over capacity. Returns
    /// `true` if `id` was not already known.
    fn insert(&mut self, id: SubmissionID) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    fn snapshot(&self) -> Vec<SubmissionID> {
        self.order.iter().copied().collect()
    }
}

/// Owns the wait pool, the submission cache, and every stage worker; the
/// workers hold their own `Arc` handles to the fields they need (wait pool,
/// cache, store, runtime) rather than a back-reference to this struct, so
/// there's no cycle to manage -- this type is the thing application code
/// holds and drives, not something the workers themselves reach back into.
pub struct SubscriptionWatcher<R: Runtime> {
    config: PipelineConfig,
    wait_pool: Arc<WaitPool>,
    submission_cache: Arc<dyn SubmissionCache>,
    store: Arc<Mutex<SubscriptionStore>>,
    site_client: Arc<dyn SiteClient>,
    platform: Arc<dyn PlatformClient>,
    sender: Arc<Sender<R>>,
    metrics: Arc<dyn Metrics>,
    runtime: R,
    running: Arc<AtomicBool>,
    seen_ids: Arc<Mutex<SeenIds>>,
    handles: Mutex<Vec<Box<dyn SpawnHandle>>>,
}

impl<R: Runtime> SubscriptionWatcher<R> {
    pub fn new(
        config: PipelineConfig,
        site_client: Arc<dyn SiteClient>,
        platform: Arc<dyn PlatformClient>,
        submission_cache: Arc<dyn SubmissionCache>,
        store: Arc<Mutex<SubscriptionStore>>,
        metrics: Arc<dyn Metrics>,
        runtime: R,
        seen_ids: Vec<SubmissionID>,
    ) -> Self {
        let wait_pool = Arc::new(WaitPool::new(config.max_ready_for_upload, config.fetch_refresh_limit));
        let running = Arc::new(AtomicBool::new(true));
        let sender = Arc::new(Sender::new(
            wait_pool.clone(),
            store.clone(),
            submission_cache.clone(),
            platform.clone(),
            metrics.clone(),
            runtime.clone(),
            running.clone(),
        ));
        Self {
            seen_ids: Arc::new(Mutex::new(SeenIds::new(config.seen_ids_capacity, seen_ids))),
            config,
            wait_pool,
            submission_cache,
            store,
            site_client,
            platform,
            sender,
            metrics,
            runtime,
            running,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn wait_pool(&self) -> &Arc<WaitPool> {
        &self.wait_pool
    }

    pub fn store(&self) -> &Arc<Mutex<SubscriptionStore>> {
        &self.store
    }

    /// Spawns the intake loop, every stage worker, and the metrics sampler.
    /// Idempotent only in the sense that calling it twice spawns everything
    /// twice -- call once per watcher instance.
    pub fn run(&self) {
        let mut handles = self.handles.lock();

        for _ in 0..self.config.num_data_fetchers {
            let worker: Arc<dyn StageWorker> = Arc::new(DataFetcher::new(
                self.wait_pool.clone(),
                self.site_client.clone(),
                self.store.clone(),
                self.metrics.clone(),
                self.runtime.clone(),
                self.running.clone(),
            ));
            handles.push(self.spawn_worker("data_fetcher", worker));
        }
        for _ in 0..self.config.num_media_downloaders {
            let worker: Arc<dyn StageWorker> = Arc::new(MediaDownloader::new(
                self.wait_pool.clone(),
                self.submission_cache.clone(),
                self.metrics.clone(),
                self.runtime.clone(),
                self.running.clone(),
            ));
            handles.push(self.spawn_worker("media_downloader", worker));
        }
        for _ in 0..self.config.num_media_uploaders {
            let worker: Arc<dyn StageWorker> = Arc::new(MediaUploader::new(
                self.wait_pool.clone(),
                self.submission_cache.clone(),
                self.platform.clone(),
                self.metrics.clone(),
                self.runtime.clone(),
                self.running.clone(),
            ));
            handles.push(self.spawn_worker("media_uploader", worker));
        }
        handles.push(self.spawn_worker("sender", self.sender.clone()));

        handles.push(self.runtime.spawn("intake", run_intake(
            self.wait_pool.clone(),
            self.site_client.clone(),
            self.seen_ids.clone(),
            self.config.browse_poll_interval,
            self.runtime.clone(),
            self.running.clone(),
        )));
        handles.push(self.runtime.spawn("metrics_sampler", run_metrics_sampler(
            self.wait_pool.clone(),
            self.metrics.clone(),
            self.runtime.clone(),
            self.running.clone(),
        )));
    }

    fn spawn_worker(&self, name: &'static str, worker: Arc<dyn StageWorker>) -> Box<dyn SpawnHandle> {
        self.runtime.spawn(name, run_loop(worker, self.runtime.clone(), self.metrics.clone(), self.running.clone()))
    }

    /// Clears `running` and waits for every spawned task to notice and exit
    /// on its own, rather than aborting them: a worker mid-attempt needs to
    /// reach the `revert_last_attempt()` call at the end of its `run_loop`
    /// (§5), which an abort would skip entirely.
    pub async fn shutdown(&self) -> (Option<DeliveryProgress>, Vec<SubmissionID>) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles.iter_mut() {
            if let Err(err) = handle.join().await {
                tracing::error!(error = %err, "stage worker task ended with an error");
            }
        }
        (self.sender.progress(), self.seen_ids.lock().snapshot())
    }
}

async fn run_intake<R: Runtime>(
    wait_pool: Arc<WaitPool>,
    site_client: Arc<dyn SiteClient>,
    seen_ids: Arc<Mutex<SeenIds>>,
    poll_interval: Duration,
    runtime: R,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match site_client.get_browse_page().await {
            Ok(ids) => {
                for id in ids {
                    if seen_ids.lock().insert(id) {
                        wait_pool.add_sub_id(id);
                    }
                }
            },
            Err(err) => {
                errors::report_error("intake", &err).await;
            },
        }
        wait_while_running(&runtime, &running, poll_interval).await;
    }
}

async fn run_metrics_sampler<R: Runtime>(wait_pool: Arc<WaitPool>, metrics: Arc<dyn Metrics>, runtime: R, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let sizes = wait_pool.sizes();
        metrics.record_queue_sizes(QueueSizes {
            total: sizes.total,
            active: sizes.active,
            fetch_new: sizes.fetch_new,
            fetch_refresh: sizes.fetch_refresh,
            download: sizes.download,
            upload: sizes.upload,
            send: sizes.send,
        });
        wait_while_running(&runtime, &running, METRICS_SAMPLE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_ids_deduplicates_and_evicts_oldest() {
        let mut seen = SeenIds::new(2, []);
        assert!(seen.insert(SubmissionID(1)));
        assert!(seen.insert(SubmissionID(2)));
        assert!(!seen.insert(SubmissionID(1)), "already-seen id should not re-insert");
        assert_eq!(seen.snapshot(), vec![SubmissionID(1), SubmissionID(2)]);

        assert!(seen.insert(SubmissionID(3)));
        assert_eq!(seen.snapshot(), vec![SubmissionID(2), SubmissionID(3)], "oldest entry should be evicted once over capacity");
    }

    #[test]
    fn seen_ids_seeds_from_persisted_snapshot() {
        let seen = SeenIds::new(5, vec![SubmissionID(10), SubmissionID(11)]);
        assert_eq!(seen.snapshot(), vec![SubmissionID(10), SubmissionID(11)]);
    }
}

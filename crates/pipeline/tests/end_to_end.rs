//! Drives the four stage workers directly, one `do_process()` call at a
//! time, through two complete scenarios: an ordinary delivery, and a
//! submission whose media never comes back (§8 scenario 6). Calling
//! `do_process()` explicitly rather than running each worker's loop avoids
//! any dependency on `QUEUE_BACKOFF`/wall-clock timing.

use std::sync::{
    atomic::AtomicBool,
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use metrics::NoopMetrics;
use parking_lot::Mutex;
use pipeline::{
    CaptionSettings,
    DataFetcher,
    Destination,
    DownloadError,
    DownloadedFile,
    FullSubmission,
    InMemorySubmissionCache,
    MediaDownloader,
    MediaUploader,
    PlatformClient,
    SendError,
    SendSettings,
    Sender,
    SentSubmission,
    SiteClient,
    StageWorker,
    SubmissionCache,
    UploadedMedia,
    WaitPool,
};
use query::{
    QueryTarget,
    Rating,
    SubmissionID,
};
use runtime::TestRuntime;
use subscriptions::{
    Subscription,
    SubscriptionStore,
};

#[derive(Debug)]
struct StubSent;

#[async_trait]
impl SentSubmission for StubSent {
    async fn try_to_send(&self, _platform: &dyn PlatformClient, _chat: Destination, _prefix: &str) -> Result<bool, SendError> {
        Ok(true)
    }
}

struct StubPlatform;

impl PlatformClient for StubPlatform {}

#[derive(Debug)]
struct StubSubmission {
    id: SubmissionID,
    media_always_missing: bool,
}

#[async_trait]
impl FullSubmission for StubSubmission {
    fn sub_id(&self) -> SubmissionID {
        self.id
    }

    fn posted_at(&self) -> chrono::DateTime<Utc> {
        Utc::now()
    }

    fn to_query_target(&self) -> QueryTarget {
        QueryTarget::new(self.id, vec!["a cat photo".to_string()], vec![], vec![], vec![], Rating::General)
    }

    async fn download(&self) -> Result<(DownloadedFile, SendSettings), DownloadError> {
        if self.media_always_missing {
            return Err(DownloadError::new(404, "media gone"));
        }
        Ok((
            DownloadedFile {
                local_path: std::env::temp_dir().join(format!("sub-{}.bin", self.id.0)),
                content_type: "image/png".to_string(),
            },
            SendSettings {
                caption: CaptionSettings {
                    include_title: true,
                    include_artist: true,
                    include_direct_link: false,
                    caption_only: false,
                },
                silent: false,
                force_document: false,
            },
        ))
    }

    async fn upload_only(
        &self,
        _platform: &dyn PlatformClient,
        _file: &DownloadedFile,
        settings: &SendSettings,
    ) -> Result<UploadedMedia, SendError> {
        Ok(UploadedMedia {
            sub_id: self.id,
            media: Some("uploaded-handle".to_string()),
            send_settings: settings.clone(),
        })
    }

    async fn send_message(
        &self,
        _platform: &dyn PlatformClient,
        _chat: Destination,
        _prefix: &str,
        _uploaded_media: &UploadedMedia,
    ) -> Result<Box<dyn SentSubmission>, SendError> {
        Ok(Box::new(StubSent))
    }
}

struct StubSiteClient {
    media_always_missing: bool,
}

#[async_trait]
impl SiteClient for StubSiteClient {
    async fn get_browse_page(&self) -> anyhow::Result<Vec<SubmissionID>> {
        Ok(vec![])
    }

    async fn get_full_submission(&self, id: SubmissionID) -> Result<Box<dyn FullSubmission>, DownloadError> {
        Ok(Box::new(StubSubmission {
            id,
            media_always_missing: self.media_always_missing,
        }))
    }
}

/// Succeeds on its first call, then 404s on every metadata refetch after
/// that -- simulating a submission whose media goes missing and whose
/// metadata then also disappears once the fetch queue tries to refresh it.
struct FlakySiteClient {
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl SiteClient for FlakySiteClient {
    async fn get_browse_page(&self) -> anyhow::Result<Vec<SubmissionID>> {
        Ok(vec![])
    }

    async fn get_full_submission(&self, id: SubmissionID) -> Result<Box<dyn FullSubmission>, DownloadError> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call == 0 {
            return Ok(Box::new(StubSubmission { id, media_always_missing: true }));
        }
        Err(DownloadError::new(404, "submission gone"))
    }
}

fn store_with_cat_subscription() -> Arc<Mutex<SubscriptionStore>> {
    let mut store = SubscriptionStore::new();
    store.add_subscription(Subscription::new("cat", 1).unwrap()).unwrap();
    Arc::new(Mutex::new(store))
}

#[tokio::test]
async fn happy_path_delivers_through_every_stage() {
    let runtime = TestRuntime::new();
    let wait_pool = Arc::new(WaitPool::new(10, 5));
    let store = store_with_cat_subscription();
    let site_client: Arc<dyn SiteClient> = Arc::new(StubSiteClient { media_always_missing: false });
    let cache: Arc<dyn SubmissionCache> = Arc::new(InMemorySubmissionCache::new());
    let platform: Arc<dyn PlatformClient> = Arc::new(StubPlatform);
    let metrics = Arc::new(NoopMetrics);
    let running = Arc::new(AtomicBool::new(true));

    let data_fetcher = DataFetcher::new(wait_pool.clone(), site_client.clone(), store.clone(), metrics.clone(), runtime.clone(), running.clone());
    let media_downloader = MediaDownloader::new(wait_pool.clone(), cache.clone(), metrics.clone(), runtime.clone(), running.clone());
    let media_uploader = MediaUploader::new(wait_pool.clone(), cache.clone(), platform.clone(), metrics.clone(), runtime.clone(), running.clone());
    let sender = Sender::new(wait_pool.clone(), store.clone(), cache.clone(), platform.clone(), metrics.clone(), runtime.clone(), running.clone());

    wait_pool.add_sub_id(SubmissionID(7));

    assert!(data_fetcher.do_process().await.unwrap());
    assert!(media_downloader.do_process().await.unwrap());
    assert!(media_uploader.do_process().await.unwrap());
    assert!(sender.do_process().await.unwrap());

    let progress = sender.progress().expect("submission should have been delivered");
    assert_eq!(progress.latest_id, SubmissionID(7));
    assert_eq!(wait_pool.size(), 0);
}

#[tokio::test]
async fn media_gone_past_refresh_limit_sends_without_media() {
    let runtime = TestRuntime::new();
    let fetch_refresh_limit = 2;
    let wait_pool = Arc::new(WaitPool::new(10, fetch_refresh_limit));
    let store = store_with_cat_subscription();
    let site_client: Arc<dyn SiteClient> = Arc::new(StubSiteClient { media_always_missing: true });
    let cache: Arc<dyn SubmissionCache> = Arc::new(InMemorySubmissionCache::new());
    let platform: Arc<dyn PlatformClient> = Arc::new(StubPlatform);
    let metrics = Arc::new(NoopMetrics);
    let running = Arc::new(AtomicBool::new(true));

    let data_fetcher = DataFetcher::new(wait_pool.clone(), site_client.clone(), store.clone(), metrics.clone(), runtime.clone(), running.clone());
    let media_downloader = MediaDownloader::new(wait_pool.clone(), cache.clone(), metrics.clone(), runtime.clone(), running.clone());
    let sender = Sender::new(wait_pool.clone(), store.clone(), cache.clone(), platform.clone(), metrics.clone(), runtime.clone(), running.clone());

    wait_pool.add_sub_id(SubmissionID(3));

    // Each 404 re-queues the id as a refresh; the (limit + 1)th refresh
    // exceeds `fetch_refresh_limit` and finalizes with the "no media"
    // sentinel instead of refreshing forever.
    for _ in 0..=fetch_refresh_limit {
        assert!(data_fetcher.do_process().await.unwrap());
        assert!(media_downloader.do_process().await.unwrap());
    }

    assert!(sender.do_process().await.unwrap());
    let progress = sender.progress().expect("submission should still be delivered without its media");
    assert_eq!(progress.latest_id, SubmissionID(3));
}

#[tokio::test]
async fn metadata_gone_during_refresh_still_delivers_from_last_known_data() {
    let runtime = TestRuntime::new();
    let fetch_refresh_limit = 1;
    let wait_pool = Arc::new(WaitPool::new(10, fetch_refresh_limit));
    let store = store_with_cat_subscription();
    let site_client: Arc<dyn SiteClient> = Arc::new(FlakySiteClient { calls: std::sync::atomic::AtomicUsize::new(0) });
    let cache: Arc<dyn SubmissionCache> = Arc::new(InMemorySubmissionCache::new());
    let platform: Arc<dyn PlatformClient> = Arc::new(StubPlatform);
    let metrics = Arc::new(NoopMetrics);
    let running = Arc::new(AtomicBool::new(true));

    let data_fetcher = DataFetcher::new(wait_pool.clone(), site_client.clone(), store.clone(), metrics.clone(), runtime.clone(), running.clone());
    let media_downloader = MediaDownloader::new(wait_pool.clone(), cache.clone(), metrics.clone(), runtime.clone(), running.clone());
    let sender = Sender::new(wait_pool.clone(), store.clone(), cache.clone(), platform.clone(), metrics.clone(), runtime.clone(), running.clone());

    wait_pool.add_sub_id(SubmissionID(11));

    // First fetch succeeds; the download then 404s, reverting for a
    // refresh. The refresh's own metadata fetch 404s too, exceeding
    // `fetch_refresh_limit` and finalizing from the last known data rather
    // than dropping the submission outright.
    assert!(data_fetcher.do_process().await.unwrap());
    assert!(media_downloader.do_process().await.unwrap());
    assert!(data_fetcher.do_process().await.unwrap());

    assert!(sender.do_process().await.unwrap());
    let progress = sender.progress().expect("submission should still be delivered from its last known data");
    assert_eq!(progress.latest_id, SubmissionID(11));
}

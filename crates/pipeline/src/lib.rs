//! The subscription-delivery pipeline: the wait pool, fetch queue, and the
//! four stage workers (DataFetcher, MediaDownloader, MediaUploader, Sender)
//! that move a submission from "just fetched" to "delivered." Ported from
//! `fa_search_bot/subscriptions/`.

pub mod cache;
pub mod check_state;
pub mod client;
pub mod data_fetcher;
pub mod fetch_queue;
pub mod media_downloader;
pub mod media_uploader;
pub mod sender;
pub mod wait_pool;
pub mod watcher;
pub mod worker;

pub use cache::{
    InMemorySubmissionCache,
    SubmissionCache,
};
pub use check_state::CheckState;
pub use client::{
    CaptionSettings,
    DownloadError,
    DownloadedFile,
    Destination,
    FullSubmission,
    PlatformClient,
    SendError,
    SendSettings,
    SentSubmission,
    SiteClient,
    UploadedMedia,
};
pub use data_fetcher::DataFetcher;
pub use fetch_queue::FetchQueue;
pub use media_downloader::MediaDownloader;
pub use media_uploader::MediaUploader;
pub use sender::{
    DeliveryProgress,
    Sender,
};
pub use wait_pool::{
    WaitPool,
    WaitPoolSizes,
};
pub use watcher::SubscriptionWatcher;
pub use worker::StageWorker;

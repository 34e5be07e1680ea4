//! The external-system boundary (§6): the art site and the delivery
//! platform. The core never talks to a concrete HTTP client or chat
//! platform directly -- every stage worker is written against these traits,
//! so tests can swap in an in-memory double instead of a real network.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use query::{
    QueryTarget,
    SubmissionID,
};

/// A chat/channel destination on the delivery platform. Matches
/// `Subscription::destination`.
pub type Destination = i64;

/// An error raised while fetching submission data or media from the art
/// site. `status` is the HTTP status code where one is available.
#[derive(Debug, Clone, thiserror::Error)]
#[error("download failed with status {status}: {message}")]
pub struct DownloadError {
    pub status: u16,
    pub message: String,
}

impl DownloadError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Whether this is one of the transient statuses media downloads retry
    /// on, per §4.7.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 502 | 520 | 522 | 403 | 524)
    }
}

/// A platform-side send/upload failure. Each variant maps to one of the
/// branches the Sender handles in §4.7.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// The bot has been blocked, deactivated, or the channel/peer is no
    /// longer valid -- the destination should be paused, not retried.
    #[error("destination is blocked, deactivated, or invalid")]
    DestinationUnreachable,
    /// The platform asked the sender to wait before trying again.
    #[error("flood wait requested: {seconds}s")]
    FloodWait { seconds: u64 },
    /// The media handle referenced a file part the platform no longer has;
    /// the cached/uploaded handle is stale and the submission must be
    /// refetched.
    #[error("file part missing")]
    FilePartMissing,
    /// The wait-pool state reached the Sender with neither uploaded media
    /// nor a cache entry to send -- the submission must be refetched rather
    /// than retried against the destination.
    #[error("submission has no uploaded media or cache entry")]
    MediaMissing,
    /// Any other platform failure; retried up to `SEND_ATTEMPTS` and then
    /// propagated.
    #[error("send failed: {0}")]
    Other(String),
}

/// The binary downloaded from the art site, staged somewhere the uploader
/// can read it from.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub local_path: PathBuf,
    pub content_type: String,
}

/// How a submission should be captioned/sent, independent of which media
/// handle (if any) it carries.
#[derive(Debug, Clone)]
pub struct CaptionSettings {
    pub include_title: bool,
    pub include_artist: bool,
    pub include_direct_link: bool,
    pub caption_only: bool,
}

#[derive(Debug, Clone)]
pub struct SendSettings {
    pub caption: CaptionSettings,
    pub silent: bool,
    pub force_document: bool,
}

/// An opaque platform-side handle to uploaded media, produced by
/// [`FullSubmission::upload_only`] and consumed by
/// [`FullSubmission::send_message`]. `media` is `None` for the "no media"
/// sentinel sent when a submission's media could not be recovered after
/// `fetch_refresh_limit` refreshes (§4.7 scenario 6).
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub sub_id: SubmissionID,
    pub media: Option<String>,
    pub send_settings: SendSettings,
}

impl UploadedMedia {
    /// The sentinel sent in place of real media once a submission's
    /// `fetch_refresh_limit` has been exhausted.
    pub fn no_media(sub_id: SubmissionID) -> Self {
        Self {
            sub_id,
            media: None,
            send_settings: SendSettings {
                caption: CaptionSettings {
                    include_title: true,
                    include_artist: true,
                    include_direct_link: true,
                    caption_only: true,
                },
                silent: false,
                force_document: false,
            },
        }
    }
}

/// A record of a successful delivery, replayable against further
/// destinations without re-uploading. Returned by
/// [`FullSubmission::send_message`] and looked up by [`crate::cache::SubmissionCache`].
#[async_trait]
pub trait SentSubmission: Send + Sync + std::fmt::Debug + 'static {
    /// Re-send this already-delivered submission to another destination.
    /// Returns `false` if the cached handle is no longer usable and the
    /// caller should fall back to a fresh upload.
    async fn try_to_send(
        &self,
        platform: &dyn PlatformClient,
        chat: Destination,
        prefix: &str,
    ) -> Result<bool, SendError>;
}

/// Marker for whatever concrete client the platform adapter needs (a
/// Telegram session, an API token, etc.). The core only ever holds it
/// behind `&dyn PlatformClient` and passes it through.
pub trait PlatformClient: Send + Sync + 'static {}

/// One submission's full metadata, as fetched from the art site. Also the
/// "sendable" surface: downloading, uploading, and sending are all actions
/// performed on a specific submission (mirrors `SendableFASubmission`
/// wrapping `FASubmissionFull` in the original).
#[async_trait]
pub trait FullSubmission: Send + Sync + std::fmt::Debug + 'static {
    fn sub_id(&self) -> SubmissionID;
    fn posted_at(&self) -> DateTime<Utc>;
    fn to_query_target(&self) -> QueryTarget;

    /// Download the submission's media to local storage. May fail with a
    /// [`DownloadError`] (404 if media has disappeared, or a transient
    /// status worth retrying).
    async fn download(&self) -> Result<(DownloadedFile, SendSettings), DownloadError>;

    /// Upload previously-downloaded media to the platform without sending
    /// it anywhere yet.
    async fn upload_only(
        &self,
        platform: &dyn PlatformClient,
        file: &DownloadedFile,
        settings: &SendSettings,
    ) -> Result<UploadedMedia, SendError>;

    /// Deliver `uploaded_media` to `chat`, prefixed with `prefix` (the
    /// "Update on ... subscriptions:" banner). Returns a replayable handle.
    async fn send_message(
        &self,
        platform: &dyn PlatformClient,
        chat: Destination,
        prefix: &str,
        uploaded_media: &UploadedMedia,
    ) -> Result<Box<dyn SentSubmission>, SendError>;
}

/// The art site itself: listing newly-published submissions and fetching
/// one submission's full metadata.
#[async_trait]
pub trait SiteClient: Send + Sync + 'static {
    async fn get_browse_page(&self) -> anyhow::Result<Vec<SubmissionID>>;
    async fn get_full_submission(&self, id: SubmissionID) -> Result<Box<dyn FullSubmission>, DownloadError>;
}

/// Best-effort removal of a downloaded file once it's been uploaded.
/// Failures are logged, not propagated -- a leftover sandbox file is a
/// disk-cleanup concern, not a pipeline correctness one.
pub fn try_delete_sandbox_file(path: &std::path::Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove sandbox file");
        }
    }
}

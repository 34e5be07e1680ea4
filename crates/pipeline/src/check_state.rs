//! [`CheckState`]: the per-submission pipeline record, ported from
//! `SubmissionCheckState` in
//! `fa_search_bot/subscriptions/wait_pool.py`.

use std::sync::Arc;

use query::SubmissionID;
use subscriptions::Subscription;

use crate::client::{
    Destination,
    DownloadedFile,
    FullSubmission,
    SendSettings,
    SentSubmission,
    UploadedMedia,
};

/// Where a single submission currently sits in the pipeline. Exactly one
/// `CheckState` exists per in-flight submission id (I1). Cheaply `Clone`
/// (every field is a handle or value type) so the Sender can keep a
/// recovery snapshot alongside the copy it's actively mutating.
#[derive(Clone)]
pub struct CheckState {
    pub sub_id: SubmissionID,
    pub full_data: Option<Arc<dyn FullSubmission>>,
    /// The most recent successfully fetched `full_data`, kept across
    /// `reset()` unlike `full_data` itself. A later refresh fetch that
    /// fails permanently (metadata gone, not just media) has nothing
    /// current to finalize with, so it falls back to this snapshot rather
    /// than dropping an already-matched submission silently.
    pub last_known_full_data: Option<Arc<dyn FullSubmission>>,
    pub matching_subscriptions: Option<Vec<Subscription>>,
    pub media_downloading: bool,
    pub dl_file: Option<(DownloadedFile, SendSettings)>,
    pub media_uploading: bool,
    pub cache_entry: Option<Arc<dyn SentSubmission>>,
    pub uploaded_media: Option<UploadedMedia>,
    pub sent_to: Vec<Destination>,
}

impl CheckState {
    pub fn new(sub_id: SubmissionID) -> Self {
        Self {
            sub_id,
            full_data: None,
            last_known_full_data: None,
            matching_subscriptions: None,
            media_downloading: false,
            dl_file: None,
            media_uploading: false,
            cache_entry: None,
            uploaded_media: None,
            sent_to: Vec::new(),
        }
    }

    /// Selection key for "lowest submission id first" work ordering
    /// (argmin across every stage's readiness set).
    pub fn key(&self) -> u64 {
        self.sub_id.key()
    }

    /// Clears every per-stage field ahead of a refresh re-fetch, keeping
    /// `sent_to` (a submission already delivered to a destination must not
    /// be re-sent there after a revert) and `last_known_full_data` (the
    /// fallback used if the refresh never produces a fresh `full_data`).
    pub fn reset(&mut self) {
        self.full_data = None;
        self.matching_subscriptions = None;
        self.media_downloading = false;
        self.dl_file = None;
        self.media_uploading = false;
        self.cache_entry = None;
        self.uploaded_media = None;
    }

    pub fn is_ready_for_media_download(&self) -> bool {
        self.full_data.is_some() && self.dl_file.is_none() && !self.media_downloading
    }

    pub fn is_ready_for_media_upload(&self) -> bool {
        self.dl_file.is_some() && !self.media_uploading && !self.is_ready_to_send()
    }

    pub fn is_ready_to_send(&self) -> bool {
        self.uploaded_media.is_some() || self.cache_entry.is_some()
    }

    /// Whether `sub_id` has already been appended to `sent_to` (I5: append
    /// only, deduplicated).
    pub fn already_sent_to(&self, destination: Destination) -> bool {
        self.sent_to.contains(&destination)
    }

    /// Records a successful delivery, deduplicated by destination (I5).
    pub fn record_sent_to(&mut self, destination: Destination) {
        if !self.already_sent_to(destination) {
            self.sent_to.push(destination);
        }
    }
}

impl std::fmt::Debug for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckState")
            .field("sub_id", &self.sub_id)
            .field("has_full_data", &self.full_data.is_some())
            .field("media_downloading", &self.media_downloading)
            .field("media_uploading", &self.media_uploading)
            .field("has_dl_file", &self.dl_file.is_some())
            .field("ready_to_send", &self.is_ready_to_send())
            .field("sent_to", &self.sent_to)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use query::{
        QueryTarget,
        Rating,
    };

    use super::*;
    use crate::client::{
        DownloadError,
        PlatformClient,
        SendError,
    };

    #[derive(Debug)]
    struct StubFullSubmission(SubmissionID);

    #[async_trait]
    impl FullSubmission for StubFullSubmission {
        fn sub_id(&self) -> SubmissionID {
            self.0
        }

        fn posted_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }

        fn to_query_target(&self) -> QueryTarget {
            QueryTarget::new(self.0, vec![], vec![], vec![], vec![], Rating::General)
        }

        async fn download(&self) -> Result<(DownloadedFile, SendSettings), DownloadError> {
            unimplemented!()
        }

        async fn upload_only(
            &self,
            _platform: &dyn PlatformClient,
            _file: &DownloadedFile,
            _settings: &SendSettings,
        ) -> Result<UploadedMedia, SendError> {
            unimplemented!()
        }

        async fn send_message(
            &self,
            _platform: &dyn PlatformClient,
            _chat: Destination,
            _prefix: &str,
            _uploaded_media: &UploadedMedia,
        ) -> Result<Box<dyn SentSubmission>, SendError> {
            unimplemented!()
        }
    }

    #[test]
    fn fresh_state_is_not_ready_for_anything() {
        let state = CheckState::new(SubmissionID(1));
        assert!(!state.is_ready_for_media_download());
        assert!(!state.is_ready_for_media_upload());
        assert!(!state.is_ready_to_send());
    }

    #[test]
    fn reset_clears_everything_but_sent_to() {
        let mut state = CheckState::new(SubmissionID(1));
        state.record_sent_to(7);
        state.media_downloading = true;
        state.reset();
        assert!(!state.media_downloading);
        assert_eq!(state.sent_to, vec![7]);
    }

    #[test]
    fn reset_keeps_last_known_full_data() {
        let mut state = CheckState::new(SubmissionID(1));
        state.last_known_full_data = Some(Arc::new(StubFullSubmission(SubmissionID(1))));
        state.reset();
        assert!(state.last_known_full_data.is_some());
        assert!(state.full_data.is_none());
    }

    #[test]
    fn record_sent_to_is_deduplicated() {
        let mut state = CheckState::new(SubmissionID(1));
        state.record_sent_to(7);
        state.record_sent_to(7);
        assert_eq!(state.sent_to, vec![7]);
    }
}

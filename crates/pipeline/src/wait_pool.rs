//! The wait pool (§4.6): the central scheduler all four stage workers pull
//! from and publish into. Ported from `WaitPool` in
//! `fa_search_bot/subscriptions/wait_pool.py`, with the `asyncio.Lock` +
//! `asyncio.Event` pair replaced by a synchronous `parking_lot::Mutex` (no
//! `.await` is ever held across it, per §5) plus a `tokio::sync::Notify`
//! pulse for the backpressure gate.

use std::collections::HashMap;

use errors::WatcherError;
use query::SubmissionID;
use subscriptions::Subscription;
use tokio::sync::Notify;

use crate::{
    check_state::CheckState,
    client::{
        DownloadedFile,
        FullSubmission,
        SendSettings,
    },
    fetch_queue::FetchQueue,
};

struct Inner {
    submission_state: HashMap<SubmissionID, CheckState>,
    active_states: HashMap<SubmissionID, ()>,
    fetch_queue: FetchQueue,
}

/// Snapshot of the wait pool's queue depths, computed under the lock and
/// handed back without it so [`Metrics::record_queue_sizes`] doesn't itself
/// need to take the lock.
///
/// [`Metrics::record_queue_sizes`]: metrics::Metrics::record_queue_sizes
pub struct WaitPoolSizes {
    pub total: usize,
    pub active: usize,
    pub fetch_new: usize,
    pub fetch_refresh: usize,
    pub download: usize,
    pub upload: usize,
    pub send: usize,
}

pub struct WaitPool {
    max_ready_for_upload: usize,
    inner: parking_lot::Mutex<Inner>,
    /// Pulsed every time a state's stage changes, so a data fetcher parked
    /// on the backpressure gate wakes promptly instead of polling.
    progress: Notify,
}

impl WaitPool {
    pub fn new(max_ready_for_upload: usize, fetch_refresh_limit: u32) -> Self {
        Self {
            max_ready_for_upload,
            inner: parking_lot::Mutex::new(Inner {
                submission_state: HashMap::new(),
                active_states: HashMap::new(),
                fetch_queue: FetchQueue::new(fetch_refresh_limit),
            }),
            progress: Notify::new(),
        }
    }

    pub fn add_sub_id(&self, sub_id: SubmissionID) {
        let mut inner = self.inner.lock();
        inner.submission_state.insert(sub_id, CheckState::new(sub_id));
        inner.fetch_queue.put_new(sub_id);
    }

    pub fn get_next_for_data_fetch(&self) -> Option<SubmissionID> {
        self.inner.lock().fetch_queue.get_nowait()
    }

    /// Publishes a fetched submission's data and subscription matches.
    /// Blocks (yielding, not spinning) until `size_active() <=
    /// max_ready_for_upload`, unless `sub_id` is already active -- a
    /// refresh never backpressures, since it would deadlock against
    /// itself (§4.6, P9).
    pub async fn set_fetched_data(
        &self,
        sub_id: SubmissionID,
        full_data: Box<dyn FullSubmission>,
        matching_subscriptions: Vec<Subscription>,
    ) {
        let already_active = self.inner.lock().active_states.contains_key(&sub_id);
        if !already_active {
            loop {
                let notified = self.progress.notified();
                if self.size_active() <= self.max_ready_for_upload {
                    break;
                }
                tracing::debug!("waiting for media uploads to drain below the backpressure limit");
                notified.await;
            }
        }
        let mut inner = self.inner.lock();
        let Some(state) = inner.submission_state.get_mut(&sub_id) else {
            return;
        };
        let full_data: std::sync::Arc<dyn FullSubmission> = full_data.into();
        state.full_data = Some(full_data.clone());
        state.last_known_full_data = Some(full_data);
        state.matching_subscriptions = Some(matching_subscriptions);
        inner.active_states.insert(sub_id, ());
    }

    /// Reverts `sub_id` back to "nothing fetched yet" and re-queues it as a
    /// refresh. Never removes it from `active_states` (a worker that
    /// believes the id is active must keep finding it there, or risk
    /// deadlocking against a gate that never clears).
    ///
    /// Only clears the state's per-stage fields when the refresh is
    /// actually accepted. On `TooManyRefresh`, `full_data` (and everything
    /// else already fetched) is left untouched, since the caller's fallback
    /// is to finalize delivery from what's already there, not refetch it.
    pub fn revert_data_fetch(&self, sub_id: SubmissionID) -> Result<(), WatcherError> {
        let mut inner = self.inner.lock();
        let result = inner.fetch_queue.put_refresh(sub_id);
        if result.is_ok() {
            inner.submission_state.entry(sub_id).or_insert_with(|| CheckState::new(sub_id)).reset();
        }
        result
    }

    fn states_ready_for_media_download(inner: &Inner) -> Vec<SubmissionID> {
        let mut ids: Vec<SubmissionID> = inner
            .active_states
            .keys()
            .filter(|id| inner.submission_state[id].is_ready_for_media_download())
            .copied()
            .collect();
        ids.sort_by_key(|id| id.key());
        ids
    }

    fn states_ready_for_media_upload(inner: &Inner) -> Vec<SubmissionID> {
        let mut ids: Vec<SubmissionID> = inner
            .active_states
            .keys()
            .filter(|id| inner.submission_state[id].is_ready_for_media_upload())
            .copied()
            .collect();
        ids.sort_by_key(|id| id.key());
        ids
    }

    fn states_ready_to_send(inner: &Inner) -> Vec<SubmissionID> {
        let mut ids: Vec<SubmissionID> = inner
            .active_states
            .keys()
            .filter(|id| inner.submission_state[id].is_ready_to_send())
            .copied()
            .collect();
        ids.sort_by_key(|id| id.key());
        ids
    }

    /// Picks the lowest-id state ready for media download, marking it
    /// `media_downloading` so it isn't picked again, and returns its
    /// fetched data for the caller to download.
    pub fn get_next_for_media_download(&self) -> Option<std::sync::Arc<dyn FullSubmission>> {
        let mut inner = self.inner.lock();
        let id = *Self::states_ready_for_media_download(&inner).first()?;
        let state = inner.submission_state.get_mut(&id).expect("id came from active_states");
        state.media_downloading = true;
        let full_data = state.full_data.clone();
        self.progress.notify_waiters();
        full_data
    }

    pub fn set_downloaded(&self, sub_id: SubmissionID, downloaded: (DownloadedFile, SendSettings)) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.submission_state.get_mut(&sub_id) {
            state.dl_file = Some(downloaded);
            state.media_downloading = false;
        }
    }

    /// Picks the lowest-id state ready for media upload. Returns `None` if
    /// there's nothing ready; panics if a returned state somehow lacks
    /// `full_data`/`dl_file`, which would mean a readiness predicate bug.
    pub fn get_next_for_media_upload(&self) -> Option<SubmissionID> {
        let mut inner = self.inner.lock();
        let id = *Self::states_ready_for_media_upload(&inner).first()?;
        let state = inner.submission_state.get_mut(&id).expect("id came from active_states");
        state.media_uploading = true;
        assert!(state.full_data.is_some() && state.dl_file.is_some(), "ready-for-upload state {id} lacks data or media");
        self.progress.notify_waiters();
        Some(id)
    }

    /// Borrows the state for `sub_id` under the lock, for a worker that
    /// just got it from [`Self::get_next_for_media_upload`] and needs its
    /// fields to perform the upload.
    pub fn with_state<R>(&self, sub_id: SubmissionID, f: impl FnOnce(&CheckState) -> R) -> Option<R> {
        self.inner.lock().submission_state.get(&sub_id).map(f)
    }

    pub fn set_cached(&self, sub_id: SubmissionID, cache_entry: std::sync::Arc<dyn crate::client::SentSubmission>) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.submission_state.get_mut(&sub_id) {
            state.cache_entry = Some(cache_entry);
            state.media_uploading = false;
        }
        self.progress.notify_waiters();
    }

    pub fn set_uploaded(&self, sub_id: SubmissionID, uploaded: crate::client::UploadedMedia) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.submission_state.get_mut(&sub_id) {
            state.uploaded_media = Some(uploaded);
            state.media_uploading = false;
        }
        self.progress.notify_waiters();
    }

    /// Finalizes `sub_id` with the "no media" sentinel when its metadata
    /// fetch itself has permanently failed during a refresh, not just its
    /// media -- `full_data` was cleared by the revert that queued this
    /// refresh, so this restores it from `last_known_full_data` (the most
    /// recent successful fetch) before marking the submission ready to
    /// send. Returns `false` (and leaves the state untouched) if there is
    /// no prior fetch to fall back to.
    pub fn finalize_without_media(&self, sub_id: SubmissionID) -> bool {
        let mut inner = self.inner.lock();
        let Some(state) = inner.submission_state.get_mut(&sub_id) else {
            return false;
        };
        let Some(full_data) = state.last_known_full_data.clone() else {
            return false;
        };
        state.full_data = Some(full_data);
        state.uploaded_media = Some(crate::client::UploadedMedia::no_media(sub_id));
        state.media_uploading = false;
        self.progress.notify_waiters();
        true
    }

    /// Whether `sub_id` has ever completed a successful data fetch -- i.e.
    /// whether a fetch for it is a refresh of previously matched data, as
    /// opposed to a brand new, never-yet-resolved submission.
    pub fn is_active(&self, sub_id: SubmissionID) -> bool {
        self.inner.lock().active_states.contains_key(&sub_id)
    }

    pub fn remove_state(&self, sub_id: SubmissionID) -> Result<(), WatcherError> {
        let mut inner = self.inner.lock();
        if inner.submission_state.remove(&sub_id).is_none() {
            return Err(WatcherError::not_found(format!("submission {sub_id} in wait pool")));
        }
        inner.active_states.remove(&sub_id);
        Ok(())
    }

    /// Pops the globally lowest-id state if (and only if) it's ready to
    /// send, preserving strict-ascending delivery order (P7, P8): a
    /// not-yet-ready lowest id blocks the Sender rather than letting it
    /// skip ahead to a higher id that happens to be ready.
    pub fn pop_next_ready_to_send(&self) -> Option<CheckState> {
        let mut inner = self.inner.lock();
        let id = *inner.submission_state.keys().min_by_key(|id| id.key())?;
        if !inner.submission_state[&id].is_ready_to_send() {
            return None;
        }
        let state = inner.submission_state.remove(&id).expect("id came from submission_state");
        inner.active_states.remove(&id);
        self.progress.notify_waiters();
        Some(state)
    }

    /// Returns a popped state to the pool, used by the Sender's
    /// `revert_last_attempt` when it crashes mid-send. Active-states
    /// membership is restored iff the state still carries `full_data`.
    pub fn return_populated_state(&self, state: CheckState) {
        let mut inner = self.inner.lock();
        let sub_id = state.sub_id;
        let has_data = state.full_data.is_some();
        inner.submission_state.insert(sub_id, state);
        if has_data {
            inner.active_states.insert(sub_id, ());
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().submission_state.len()
    }

    pub fn size_active(&self) -> usize {
        self.inner.lock().active_states.len()
    }

    pub fn qsize_fetch_new(&self) -> usize {
        self.inner.lock().fetch_queue.qsize_new()
    }

    pub fn qsize_fetch_refresh(&self) -> usize {
        self.inner.lock().fetch_queue.qsize_refresh()
    }

    /// Recomputes every gauge in a single lock acquisition, for the
    /// periodic metrics sampler.
    pub fn sizes(&self) -> WaitPoolSizes {
        let inner = self.inner.lock();
        WaitPoolSizes {
            total: inner.submission_state.len(),
            active: inner.active_states.len(),
            fetch_new: inner.fetch_queue.qsize_new(),
            fetch_refresh: inner.fetch_queue.qsize_refresh(),
            download: Self::states_ready_for_media_download(&inner).len(),
            upload: Self::states_ready_for_media_upload(&inner).len(),
            send: Self::states_ready_to_send(&inner).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    };

    use async_trait::async_trait;
    use chrono::Utc;
    use query::{
        QueryTarget,
        Rating,
    };

    use super::*;
    use crate::client::{
        Destination,
        DownloadError,
        PlatformClient,
        SentSubmission,
        UploadedMedia,
    };

    #[derive(Debug)]
    struct StubSubmission(SubmissionID);

    #[async_trait]
    impl FullSubmission for StubSubmission {
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
        ) -> Result<UploadedMedia, crate::client::SendError> {
            unimplemented!()
        }

        async fn send_message(
            &self,
            _platform: &dyn PlatformClient,
            _chat: Destination,
            _prefix: &str,
            _uploaded_media: &UploadedMedia,
        ) -> Result<Box<dyn SentSubmission>, crate::client::SendError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn set_fetched_data_moves_state_into_active() {
        let pool = WaitPool::new(100, 25);
        pool.add_sub_id(SubmissionID(1));
        assert_eq!(pool.size_active(), 0);
        pool.set_fetched_data(SubmissionID(1), Box::new(StubSubmission(SubmissionID(1))), vec![]).await;
        assert_eq!(pool.size_active(), 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn revert_data_fetch_keeps_active_membership() {
        let pool = WaitPool::new(100, 25);
        pool.add_sub_id(SubmissionID(1));
        pool.set_fetched_data(SubmissionID(1), Box::new(StubSubmission(SubmissionID(1))), vec![]).await;
        pool.revert_data_fetch(SubmissionID(1)).unwrap();
        // Not removed from active_states, per §4.6's deadlock-avoidance note.
        assert_eq!(pool.size_active(), 1);
        assert!(pool.get_next_for_media_download().is_none());
    }

    #[tokio::test]
    async fn is_active_distinguishes_new_ids_from_refreshes() {
        let pool = WaitPool::new(100, 25);
        pool.add_sub_id(SubmissionID(1));
        assert!(!pool.is_active(SubmissionID(1)), "never fetched, not yet active");
        pool.set_fetched_data(SubmissionID(1), Box::new(StubSubmission(SubmissionID(1))), vec![]).await;
        assert!(pool.is_active(SubmissionID(1)), "fetched once, a second pass is a refresh");
    }

    #[tokio::test]
    async fn pop_next_ready_to_send_requires_lowest_id_ready() {
        let pool = WaitPool::new(100, 25);
        pool.add_sub_id(SubmissionID(1));
        pool.add_sub_id(SubmissionID(2));
        pool.set_fetched_data(SubmissionID(2), Box::new(StubSubmission(SubmissionID(2))), vec![]).await;
        pool.set_uploaded(SubmissionID(2), UploadedMedia::no_media(SubmissionID(2)));
        // id 1 exists but isn't ready; the Sender must not skip ahead to id 2 (P7).
        assert!(pool.pop_next_ready_to_send().is_none());
        pool.remove_state(SubmissionID(1)).unwrap();
        let popped = pool.pop_next_ready_to_send().expect("id 2 alone should now be poppable");
        assert_eq!(popped.sub_id, SubmissionID(2));
    }

    #[tokio::test]
    async fn backpressure_blocks_new_ids_until_drain() {
        let pool = Arc::new(WaitPool::new(1, 25));
        pool.add_sub_id(SubmissionID(1));
        pool.set_fetched_data(SubmissionID(1), Box::new(StubSubmission(SubmissionID(1))), vec![]).await;
        pool.set_uploaded(SubmissionID(1), UploadedMedia::no_media(SubmissionID(1)));
        assert_eq!(pool.size_active(), 1);

        pool.add_sub_id(SubmissionID(2));
        let progressed = Arc::new(AtomicUsize::new(0));
        let pool2 = pool.clone();
        let progressed2 = progressed.clone();
        let blocked = tokio::spawn(async move {
            pool2.set_fetched_data(SubmissionID(2), Box::new(StubSubmission(SubmissionID(2))), vec![]).await;
            progressed2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        assert_eq!(progressed.load(Ordering::SeqCst), 0, "must not proceed while over the backpressure limit");

        // Draining id 1 via the Sender's pop is what actually reduces
        // `size_active` and pulses the progress event in the original --
        // plain removal never pulses.
        let popped = pool.pop_next_ready_to_send().expect("id 1 is ready to send");
        assert_eq!(popped.sub_id, SubmissionID(1));

        blocked.await.unwrap();
        assert_eq!(progressed.load(Ordering::SeqCst), 1);
    }
}

//! The Sender stage worker (§4.7), the single-instance (I6) delivery stage.
//! Ported from `Sender` in `fa_search_bot/subscriptions/sender.py`.

use std::{
    collections::HashMap,
    sync::{
        atomic::AtomicBool,
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use metrics::{
    Metrics,
    Outcome,
    Stage,
    StageTimer,
};
use parking_lot::Mutex;
use query::SubmissionID;
use runtime::Runtime;
use subscriptions::{
    Subscription,
    SubscriptionStore,
};

use crate::{
    cache::SubmissionCache,
    check_state::CheckState,
    client::{
        Destination,
        PlatformClient,
        SendError,
    },
    wait_pool::WaitPool,
    worker::StageWorker,
};

pub const SEND_ATTEMPTS: u32 = 3;
pub const WAIT_BETWEEN_FLOOD_LOGS: Duration = Duration::from_secs(60);

/// The submission-id ordered delivery record the watcher publishes after
/// every successful send, feeding `latest_ids`/`latest_observed` (§4.11,
/// persisted so the watcher can resume from where it left off).
#[derive(Debug, Clone)]
pub struct DeliveryProgress {
    pub latest_observed: DateTime<Utc>,
    pub latest_id: SubmissionID,
}

pub struct Sender<R: Runtime> {
    wait_pool: Arc<WaitPool>,
    store: Arc<Mutex<SubscriptionStore>>,
    submission_cache: Arc<dyn SubmissionCache>,
    platform: Arc<dyn PlatformClient>,
    metrics: Arc<dyn Metrics>,
    runtime: R,
    running: Arc<AtomicBool>,
    last_state: Mutex<Option<CheckState>>,
    progress: Mutex<Option<DeliveryProgress>>,
}

impl<R: Runtime> Sender<R> {
    pub fn new(
        wait_pool: Arc<WaitPool>,
        store: Arc<Mutex<SubscriptionStore>>,
        submission_cache: Arc<dyn SubmissionCache>,
        platform: Arc<dyn PlatformClient>,
        metrics: Arc<dyn Metrics>,
        runtime: R,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            wait_pool,
            store,
            submission_cache,
            platform,
            metrics,
            runtime,
            running,
            last_state: Mutex::new(None),
            progress: Mutex::new(None),
        }
    }

    /// The most recently recorded delivery (monotonically advancing,
    /// written only here), for the entrypoint to persist on shutdown.
    pub fn progress(&self) -> Option<DeliveryProgress> {
        self.progress.lock().clone()
    }

    async fn send_updates(&self, state: &mut CheckState) -> anyhow::Result<()> {
        let full_data = state.full_data.clone().expect("ready-to-send state must have full_data");
        let target = full_data.to_query_target();

        // Re-check against the live subscription set: subscriptions may
        // have been added, removed, or paused, and blocklists may have
        // changed, since this id was fetched.
        let rechecked: Vec<Subscription> = self.store.lock().matching_subscriptions(&target).into_iter().cloned().collect();

        let mut by_destination: HashMap<Destination, Vec<Subscription>> = HashMap::new();
        for sub in rechecked {
            by_destination.entry(sub.destination).or_default().push(sub);
        }

        for (destination, subs) in by_destination {
            if state.already_sent_to(destination) {
                continue;
            }
            let queries = subs.iter().map(|s| format!("\"{}\"", s.query_str)).collect::<Vec<_>>().join(", ");
            let suffix = if subs.len() == 1 { "" } else { "s" };
            let prefix = format!("Update on {queries} subscription{suffix}:");
            self.try_send_to_destination(&*full_data, state, destination, &prefix).await?;
            // Keep the crash-recovery snapshot current as destinations
            // complete, so `revert_last_attempt` doesn't re-send to ones
            // already delivered.
            *self.last_state.lock() = Some(state.clone());
        }
        Ok(())
    }

    async fn try_send_to_destination(
        &self,
        full_data: &dyn crate::client::FullSubmission,
        state: &mut CheckState,
        chat: Destination,
        prefix: &str,
    ) -> anyhow::Result<()> {
        for attempt in 1..=SEND_ATTEMPTS {
            match self.send_one(full_data, state, chat, prefix).await {
                Ok(()) => {
                    state.record_sent_to(chat);
                    return Ok(());
                },
                Err(SendError::DestinationUnreachable) => {
                    tracing::info!(destination = chat, "destination is blocked or deleted, pausing subscriptions");
                    self.store.lock().pause_destination(chat).ok();
                    return Ok(());
                },
                Err(SendError::FloodWait { seconds }) => {
                    tracing::warn!(destination = chat, seconds, "flood wait requested, sleeping");
                    self.flood_wait(seconds).await;
                    continue;
                },
                Err(SendError::FilePartMissing) => {
                    tracing::warn!(destination = chat, "file part missing, reverting for refetch");
                    self.wait_pool.revert_data_fetch(state.sub_id).ok();
                    return Ok(());
                },
                Err(SendError::MediaMissing) => {
                    tracing::warn!(destination = chat, sub_id = %state.sub_id, "no uploaded media or cache entry, reverting for refetch");
                    self.wait_pool.revert_data_fetch(state.sub_id).ok();
                    return Ok(());
                },
                Err(SendError::Other(message)) if attempt < SEND_ATTEMPTS => {
                    tracing::warn!(destination = chat, attempt, "send failed: {message}, retrying");
                },
                Err(SendError::Other(message)) => {
                    anyhow::bail!("failed to send submission {} to {chat}: {message}", state.sub_id);
                },
            }
        }
        Ok(())
    }

    async fn send_one(
        &self,
        full_data: &dyn crate::client::FullSubmission,
        state: &mut CheckState,
        chat: Destination,
        prefix: &str,
    ) -> Result<(), SendError> {
        if let Some(cache_entry) = state.cache_entry.clone() {
            if cache_entry.try_to_send(self.platform.as_ref(), chat, prefix).await? {
                return Ok(());
            }
        }
        if state.uploaded_media.is_none() {
            if let Some(cache_entry) = self.submission_cache.load_cache(state.sub_id).await {
                if cache_entry.try_to_send(self.platform.as_ref(), chat, prefix).await? {
                    self.wait_pool.set_cached(state.sub_id, cache_entry);
                    return Ok(());
                }
            }
            // Neither uploaded media nor a cache entry -- this should not
            // have reached the Sender.
            return Err(SendError::MediaMissing);
        }
        let uploaded_media = state.uploaded_media.as_ref().expect("checked above");
        let result = full_data.send_message(self.platform.as_ref(), chat, prefix, uploaded_media).await?;
        let result: Arc<dyn crate::client::SentSubmission> = Arc::from(result);
        self.submission_cache.save_cache(state.sub_id, result).await;
        Ok(())
    }

    async fn flood_wait(&self, seconds: u64) {
        let mut remaining = Duration::from_secs(seconds);
        while remaining > Duration::ZERO && self.running.load(std::sync::atomic::Ordering::SeqCst) {
            let step = remaining.min(WAIT_BETWEEN_FLOOD_LOGS);
            tracing::warn!(seconds = step.as_secs(), "waiting for flood wait to expire");
            self.runtime.wait(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }
}

#[async_trait]
impl<R: Runtime> StageWorker for Sender<R> {
    fn name(&self) -> &'static str {
        "sender"
    }

    async fn do_process(&self) -> anyhow::Result<bool> {
        let mut timer = StageTimer::start(self.metrics.as_ref(), Stage::Sender);
        let Some(mut state) = self.wait_pool.pop_next_ready_to_send() else {
            timer.set_outcome(Outcome::Dropped);
            return Ok(false);
        };
        *self.last_state.lock() = Some(state.clone());
        tracing::debug!(sub_id = %state.sub_id, "got submission ready to send");

        self.send_updates(&mut state).await?;

        let full_data = state.full_data.clone().expect("checked by send_updates");
        *self.progress.lock() = Some(DeliveryProgress {
            latest_observed: full_data.posted_at(),
            latest_id: state.sub_id,
        });
        *self.last_state.lock() = None;
        timer.set_outcome(Outcome::Success);
        Ok(true)
    }

    async fn revert_last_attempt(&self) {
        if let Some(state) = self.last_state.lock().take() {
            self.wait_pool.return_populated_state(state);
        }
    }
}

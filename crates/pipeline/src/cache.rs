//! The submission cache (§4.8): a write-through lookup from submission id to
//! a previously-sent, replayable delivery handle. Grounded on
//! `MediaDownloader`/`MediaUploader`/`Sender`'s shared `load_cache`/
//! `save_cache` calls in the original -- every stage checks the cache
//! before doing its own work.

use std::{
    collections::HashMap,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use query::SubmissionID;

use crate::client::SentSubmission;

/// O(1) lookup by submission id. Implementation is free: the contract is
/// just that a saved entry is available to any future stage that asks for
/// it. Ships with [`InMemorySubmissionCache`]; a durable cache is a
/// drop-in alternate implementation of this trait.
#[async_trait]
pub trait SubmissionCache: Send + Sync + 'static {
    async fn load_cache(&self, sub_id: SubmissionID) -> Option<Arc<dyn SentSubmission>>;
    async fn save_cache(&self, sub_id: SubmissionID, entry: Arc<dyn SentSubmission>);
}

/// The default cache: a process-local map. Sufficient for single-process
/// operation and for tests; does not survive a restart.
#[derive(Default)]
pub struct InMemorySubmissionCache {
    entries: Mutex<HashMap<SubmissionID, Arc<dyn SentSubmission>>>,
}

impl InMemorySubmissionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionCache for InMemorySubmissionCache {
    async fn load_cache(&self, sub_id: SubmissionID) -> Option<Arc<dyn SentSubmission>> {
        self.entries.lock().get(&sub_id).cloned()
    }

    async fn save_cache(&self, sub_id: SubmissionID, entry: Arc<dyn SentSubmission>) {
        self.entries.lock().insert(sub_id, entry);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::client::{
        Destination,
        PlatformClient,
        SendError,
    };

    #[derive(Debug)]
    struct StubSent;

    #[async_trait]
    impl SentSubmission for StubSent {
        async fn try_to_send(
            &self,
            _platform: &dyn PlatformClient,
            _chat: Destination,
            _prefix: &str,
        ) -> Result<bool, SendError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn miss_then_hit_after_save() {
        let cache = InMemorySubmissionCache::new();
        assert!(cache.load_cache(SubmissionID(1)).await.is_none());
        cache.save_cache(SubmissionID(1), Arc::new(StubSent)).await;
        assert!(cache.load_cache(SubmissionID(1)).await.is_some());
        assert!(cache.load_cache(SubmissionID(2)).await.is_none());
    }
}

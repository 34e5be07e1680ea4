//! The fetch queue (§4.5): two ordered queues, `new` and `refresh`, feeding
//! the `DataFetcher`. Grounded on the `FetchQueue`/`TooManyRefresh` contract
//! referenced (but not retrieved in source form) from
//! `fa_search_bot/subscriptions/media_downloader.py`'s
//! `from fa_search_bot.subscriptions.fetch_queue import TooManyRefresh` import.

use std::collections::{
    HashMap,
    VecDeque,
};

use errors::WatcherError;
use query::SubmissionID;

/// Two FIFOs, `new` ahead of `refresh`, plus a per-id refresh counter that
/// caps how many times a submission can be thrown back for re-fetching
/// before the caller gives up on its media (§4.7 "broken media" path).
#[derive(Default)]
pub struct FetchQueue {
    new: VecDeque<SubmissionID>,
    refresh: VecDeque<SubmissionID>,
    refresh_counts: HashMap<SubmissionID, u32>,
    fetch_refresh_limit: u32,
}

impl FetchQueue {
    pub fn new(fetch_refresh_limit: u32) -> Self {
        Self {
            new: VecDeque::new(),
            refresh: VecDeque::new(),
            refresh_counts: HashMap::new(),
            fetch_refresh_limit,
        }
    }

    pub fn put_new(&mut self, id: SubmissionID) {
        self.new.push_back(id);
    }

    /// Re-queues `id` for a refresh fetch, incrementing its refresh
    /// counter. Fails once the counter exceeds `fetch_refresh_limit`,
    /// letting the caller finalize the submission without media instead of
    /// refreshing forever.
    pub fn put_refresh(&mut self, id: SubmissionID) -> Result<(), WatcherError> {
        let count = self.refresh_counts.entry(id).or_insert(0);
        *count += 1;
        if *count > self.fetch_refresh_limit {
            return Err(WatcherError::too_many_refresh(id, self.fetch_refresh_limit));
        }
        self.refresh.push_back(id);
        Ok(())
    }

    /// `new` work always precedes `refresh` work, so a backlog of
    /// refreshes never starves freshly discovered submissions.
    pub fn get_nowait(&mut self) -> Option<SubmissionID> {
        self.new.pop_front().or_else(|| self.refresh.pop_front())
    }

    pub fn qsize_new(&self) -> usize {
        self.new.len()
    }

    pub fn qsize_refresh(&self) -> usize {
        self.refresh.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_preferred_over_refresh() {
        let mut queue = FetchQueue::new(5);
        queue.put_refresh(SubmissionID(1)).unwrap();
        queue.put_new(SubmissionID(2));
        assert_eq!(queue.get_nowait(), Some(SubmissionID(2)));
        assert_eq!(queue.get_nowait(), Some(SubmissionID(1)));
        assert_eq!(queue.get_nowait(), None);
    }

    #[test]
    fn refresh_fails_past_limit() {
        let mut queue = FetchQueue::new(2);
        queue.put_refresh(SubmissionID(1)).unwrap();
        queue.put_refresh(SubmissionID(1)).unwrap();
        let err = queue.put_refresh(SubmissionID(1)).unwrap_err();
        assert_eq!(err.code, errors::ErrorCode::TooManyRefresh);
    }

    #[test]
    fn refresh_counters_are_independent_per_id() {
        let mut queue = FetchQueue::new(1);
        queue.put_refresh(SubmissionID(1)).unwrap();
        queue.put_refresh(SubmissionID(2)).unwrap();
        assert!(queue.put_refresh(SubmissionID(1)).is_err());
        assert!(queue.put_refresh(SubmissionID(2)).is_err());
    }
}

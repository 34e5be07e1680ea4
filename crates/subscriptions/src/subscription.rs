//! A single subscription and a destination's combined blocklist query.

use std::{
    hash::{
        Hash,
        Hasher,
    },
    sync::Arc,
};

use chrono::{
    DateTime,
    Utc,
};
use errors::WatcherError;
use parking_lot::Mutex;
use query::{
    parse_query,
    Query,
    QueryTarget,
};

/// One subscribed query, scoped to a destination chat/channel.
///
/// Identity (equality, hashing, the `Duplicate`/`NotFound` checks in
/// [`crate::store::SubscriptionStore`]) is `(casefold(query_str),
/// destination)`, not the parsed AST -- two subscriptions with differently
/// cased but otherwise identical query text are the same subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub query_str: String,
    pub destination: i64,
    pub query: Query,
    pub latest_update: Option<DateTime<Utc>>,
    pub paused: bool,
}

impl Subscription {
    pub fn new(query_str: impl Into<String>, destination: i64) -> Result<Self, WatcherError> {
        let query_str = query_str.into();
        let query = parse_query(&query_str)?;
        Ok(Self {
            query_str,
            destination,
            query,
            latest_update: None,
            paused: false,
        })
    }

    fn identity(&self) -> (String, i64) {
        (self.query_str.to_lowercase(), self.destination)
    }

    /// `blocklist_query` is the destination's combined blocklist, or `None`
    /// if the destination has no blocklist entries. Checking both as
    /// separate boolean calls rather than composing an `And` is the faster
    /// path on the hot loop -- see [`crate::store::SubscriptionStore::matching_subscriptions`].
    pub fn matches_result(&self, target: &QueryTarget, blocklist_query: Option<&Query>) -> bool {
        if self.paused {
            return false;
        }
        match blocklist_query {
            Some(blocklist) => self.query.matches_submission(target) && blocklist.matches_submission(target),
            None => self.query.matches_submission(target),
        }
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Subscription {}

impl Hash for Subscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Subscription(destination={}, query=\"{}\"{})",
            self.destination,
            self.query_str,
            if self.paused { ", paused" } else { "" }
        )
    }
}

/// The combined "none of these match" query for one destination. Lazily
/// (re)built on first use after a mutation and cached until the next one.
#[derive(Debug)]
pub struct DestinationBlocklist {
    destination: i64,
    entries: Vec<(String, Query)>,
    combined: Mutex<Option<Arc<Query>>>,
}

impl DestinationBlocklist {
    fn new(destination: i64, entries: Vec<(String, Query)>) -> Self {
        Self {
            destination,
            entries,
            combined: Mutex::new(None),
        }
    }

    /// Builds a blocklist from its persisted query strings.
    pub fn from_persisted(destination: i64, queries: impl IntoIterator<Item = String>) -> Result<Self, WatcherError> {
        let entries = queries
            .into_iter()
            .map(|q| {
                let parsed = parse_query(&q)?;
                Ok((q, parsed))
            })
            .collect::<Result<Vec<_>, WatcherError>>()?;
        Ok(Self::new(destination, entries))
    }

    /// Builds a blocklist containing a single freshly-entered query, e.g.
    /// from an `/add_blocklisted_tag` command.
    pub fn from_query(destination: i64, query: impl Into<String>) -> Result<Self, WatcherError> {
        let query = query.into();
        let parsed = parse_query(&query)?;
        Ok(Self::new(destination, vec![(query, parsed)]))
    }

    pub fn destination(&self) -> i64 {
        self.destination
    }

    pub fn count_blocks(&self) -> usize {
        self.entries.len()
    }

    pub fn add(&mut self, query_str: impl Into<String>) -> Result<(), WatcherError> {
        let query_str = query_str.into();
        let parsed = parse_query(&query_str)?;
        match self.entries.iter_mut().find(|(q, _)| *q == query_str) {
            Some(entry) => entry.1 = parsed,
            None => self.entries.push((query_str, parsed)),
        }
        *self.combined.lock() = None;
        Ok(())
    }

    pub fn remove(&mut self, query_str: &str) -> Result<(), WatcherError> {
        let position = self.entries.iter().position(|(q, _)| q == query_str);
        match position {
            Some(i) => {
                self.entries.remove(i);
                *self.combined.lock() = None;
                Ok(())
            },
            None => Err(WatcherError::not_found(format!(
                "blocklist entry \"{query_str}\" for destination {}",
                self.destination
            ))),
        }
    }

    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(q, _)| q.as_str())
    }

    /// The combined `And(Not(q0), Not(q1), ...)` query. An empty blocklist
    /// combines to `And([])`, which matches everything -- nothing is
    /// blocked.
    pub fn combined(&self) -> Arc<Query> {
        if let Some(cached) = self.combined.lock().as_ref() {
            return cached.clone();
        }
        let built = Arc::new(Query::and(
            self.entries.iter().map(|(_, q)| Query::Not(Box::new(q.clone()))).collect(),
        ));
        *self.combined.lock() = Some(built.clone());
        built
    }
}

#[cfg(test)]
mod tests {
    use query::{
        Rating,
        SubmissionID,
    };

    use super::*;

    fn target(title: &str) -> QueryTarget {
        QueryTarget::new(SubmissionID(1), vec![title.to_string()], vec![], vec![], vec![], Rating::General)
    }

    #[test]
    fn identity_ignores_case_and_paused_state() {
        let a = Subscription::new("Cat", 7).unwrap();
        let b = Subscription::new("cat", 7).unwrap();
        assert_eq!(a, b);
        let c = Subscription::new("cat", 8).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn paused_subscription_never_matches() {
        let mut sub = Subscription::new("cat", 1).unwrap();
        sub.paused = true;
        assert!(!sub.matches_result(&target("a cat"), None));
    }

    #[test]
    fn empty_blocklist_blocks_nothing() {
        let blocklist = DestinationBlocklist::from_persisted(1, std::iter::empty()).unwrap();
        assert!(blocklist.combined().matches_submission(&target("a cat")));
    }

    #[test]
    fn blocklist_entry_suppresses_match() {
        let mut blocklist = DestinationBlocklist::from_query(1, "cat").unwrap();
        assert!(!blocklist.combined().matches_submission(&target("a cat")));
        blocklist.remove("cat").unwrap();
        assert!(blocklist.combined().matches_submission(&target("a cat")));
    }

    #[test]
    fn remove_missing_entry_is_not_found() {
        let mut blocklist = DestinationBlocklist::from_persisted(1, std::iter::empty()).unwrap();
        let err = blocklist.remove("cat").unwrap_err();
        assert_eq!(err.code, errors::ErrorCode::NotFound);
    }
}

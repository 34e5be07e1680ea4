//! The in-memory set of subscriptions and per-destination blocklists, plus
//! the hot-path matching loop.

use std::collections::HashMap;

use errors::WatcherError;
use query::QueryTarget;

use crate::subscription::{
    DestinationBlocklist,
    Subscription,
};

#[derive(Default)]
pub struct SubscriptionStore {
    subscriptions: Vec<Subscription>,
    blocklists: HashMap<i64, DestinationBlocklist>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn add_subscription(&mut self, sub: Subscription) -> Result<(), WatcherError> {
        if self.subscriptions.contains(&sub) {
            return Err(WatcherError::duplicate(&sub.query_str));
        }
        self.subscriptions.push(sub);
        Ok(())
    }

    pub fn remove_subscription(&mut self, sub: &Subscription) -> Result<(), WatcherError> {
        let position = self.subscriptions.iter().position(|s| s == sub);
        match position {
            Some(i) => {
                self.subscriptions.remove(i);
                Ok(())
            },
            None => Err(WatcherError::not_found(&sub.query_str)),
        }
    }

    pub fn list_by_destination(&self, destination: i64) -> Vec<&Subscription> {
        let mut subs: Vec<&Subscription> =
            self.subscriptions.iter().filter(|s| s.destination == destination).collect();
        subs.sort_by_key(|s| s.query_str.to_lowercase());
        subs
    }

    fn find_mut(&mut self, sub: &Subscription) -> Result<&mut Subscription, WatcherError> {
        self.subscriptions.iter_mut().find(|s| *s == sub).ok_or_else(|| WatcherError::not_found(&sub.query_str))
    }

    pub fn pause_subscription(&mut self, sub: &Subscription) -> Result<(), WatcherError> {
        let found = self.find_mut(sub)?;
        if found.paused {
            return Err(WatcherError::already_paused(&found.query_str));
        }
        found.paused = true;
        Ok(())
    }

    pub fn resume_subscription(&mut self, sub: &Subscription) -> Result<(), WatcherError> {
        let found = self.find_mut(sub)?;
        if !found.paused {
            return Err(WatcherError::already_running(&found.query_str));
        }
        found.paused = false;
        Ok(())
    }

    pub fn pause_destination(&mut self, destination: i64) -> Result<(), WatcherError> {
        let mut touched = false;
        let mut any = false;
        for sub in self.subscriptions.iter_mut().filter(|s| s.destination == destination) {
            any = true;
            if !sub.paused {
                sub.paused = true;
                touched = true;
            }
        }
        if !any {
            return Err(WatcherError::not_found(format!("destination {destination}")));
        }
        if !touched {
            return Err(WatcherError::already_paused(format!("destination {destination}")));
        }
        Ok(())
    }

    pub fn resume_destination(&mut self, destination: i64) -> Result<(), WatcherError> {
        let mut touched = false;
        let mut any = false;
        for sub in self.subscriptions.iter_mut().filter(|s| s.destination == destination) {
            any = true;
            if sub.paused {
                sub.paused = false;
                touched = true;
            }
        }
        if !any {
            return Err(WatcherError::not_found(format!("destination {destination}")));
        }
        if !touched {
            return Err(WatcherError::already_running(format!("destination {destination}")));
        }
        Ok(())
    }

    pub fn add_to_blocklist(&mut self, destination: i64, query_str: impl Into<String>) -> Result<(), WatcherError> {
        let query_str = query_str.into();
        match self.blocklists.get_mut(&destination) {
            Some(blocklist) => blocklist.add(query_str),
            None => {
                self.blocklists.insert(destination, DestinationBlocklist::from_query(destination, query_str)?);
                Ok(())
            },
        }
    }

    pub fn remove_from_blocklist(&mut self, destination: i64, query_str: &str) -> Result<(), WatcherError> {
        self.blocklists
            .get_mut(&destination)
            .ok_or_else(|| WatcherError::not_found(format!("blocklist entry \"{query_str}\"")))?
            .remove(query_str)
    }

    pub fn list_blocklist(&self, destination: i64) -> Vec<&str> {
        self.blocklists.get(&destination).map(|b| b.queries().collect()).unwrap_or_default()
    }

    pub fn blocklist(&self, destination: i64) -> Option<&DestinationBlocklist> {
        self.blocklists.get(&destination)
    }

    pub fn set_blocklist(&mut self, blocklist: DestinationBlocklist) {
        self.blocklists.insert(blocklist.destination(), blocklist);
    }

    pub(crate) fn blocklists(&self) -> impl Iterator<Item = (&i64, &DestinationBlocklist)> {
        self.blocklists.iter()
    }

    /// The §4.3 hot path: every live (non-paused) subscription whose query
    /// matches `target` and whose destination's blocklist doesn't.
    pub fn matching_subscriptions(&self, target: &QueryTarget) -> Vec<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|sub| {
                if sub.paused {
                    return false;
                }
                match self.blocklists.get(&sub.destination) {
                    Some(blocklist) => sub.matches_result(target, Some(&blocklist.combined())),
                    None => sub.matches_result(target, None),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use errors::ErrorCode;
    use query::{
        Rating,
        SubmissionID,
    };

    use super::*;

    #[test]
    fn duplicate_then_not_found() {
        let mut store = SubscriptionStore::new();
        let sub = Subscription::new("cat", 1).unwrap();
        store.add_subscription(sub.clone()).unwrap();
        let err = store.add_subscription(sub.clone()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Duplicate);
        store.remove_subscription(&sub).unwrap();
        let err = store.remove_subscription(&sub).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn pause_toggle_errors_on_repeat() {
        let mut store = SubscriptionStore::new();
        let sub = Subscription::new("cat", 1).unwrap();
        store.add_subscription(sub.clone()).unwrap();
        store.pause_subscription(&sub).unwrap();
        let err = store.pause_subscription(&sub).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyPaused);
        store.resume_subscription(&sub).unwrap();
        let err = store.resume_subscription(&sub).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyRunning);
    }

    #[test]
    fn matching_subscriptions_respects_blocklist() {
        let mut store = SubscriptionStore::new();
        store.add_subscription(Subscription::new("cat", 1).unwrap()).unwrap();
        store.add_to_blocklist(1, "catfish").unwrap();

        let blocked = QueryTarget::new(
            SubmissionID(1),
            vec!["a cat and a catfish".to_string()],
            vec![],
            vec![],
            vec![],
            Rating::General,
        );
        // "cat" matches, but the destination's blocklist also matches
        // ("catfish" is present), so the blocklist's combined query is
        // false and the subscription is suppressed.
        assert_eq!(store.matching_subscriptions(&blocked).len(), 0);

        let allowed = QueryTarget::new(
            SubmissionID(2),
            vec!["just a cat".to_string()],
            vec![],
            vec![],
            vec![],
            Rating::General,
        );
        assert_eq!(store.matching_subscriptions(&allowed).len(), 1);
    }

    #[test]
    fn list_by_destination_sorts_by_casefolded_query() {
        let mut store = SubscriptionStore::new();
        store.add_subscription(Subscription::new("Zebra", 1).unwrap()).unwrap();
        store.add_subscription(Subscription::new("apple", 1).unwrap()).unwrap();
        let listed = store.list_by_destination(1);
        assert_eq!(listed[0].query_str, "apple");
        assert_eq!(listed[1].query_str, "Zebra");
    }
}

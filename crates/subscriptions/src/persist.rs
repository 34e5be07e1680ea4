//! Atomic JSON load/save of the subscription store.
//!
//! Layout:
//! ```text
//! {
//!   "destinations": {
//!     "<dest_id>": {
//!       "subscriptions": [{ "query": "...", "latest_update": "...", "paused": false }],
//!       "blocklist": [{ "query": "..." }]
//!     }
//!   },
//!   "latest_ids": ["..."]
//! }
//! ```
//! A bare JSON array is accepted too, as the legacy per-subscription record
//! shape `{query, destination, latest_update}` predating destination
//! grouping.

use std::{
    collections::HashMap,
    fs::File,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};

use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    store::SubscriptionStore,
    subscription::{
        DestinationBlocklist,
        Subscription,
    },
};

#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionRecord {
    query: String,
    latest_update: Option<String>,
    #[serde(default)]
    paused: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlocklistRecord {
    query: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DestinationRecord {
    #[serde(default)]
    subscriptions: Vec<SubscriptionRecord>,
    #[serde(default)]
    blocklist: Vec<BlocklistRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedFile {
    #[serde(default)]
    destinations: HashMap<String, DestinationRecord>,
    #[serde(default)]
    latest_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacySubscriptionRecord {
    query: String,
    destination: i64,
    latest_update: Option<String>,
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("\"{raw}\" is not a valid ISO-8601 timestamp"))?
        .with_timezone(&Utc))
}

/// Loads the store from `path`. Returns an empty store (and no
/// `latest_ids`) if the file doesn't exist yet -- the first run of a fresh
/// deployment.
pub fn load(path: &Path) -> anyhow::Result<(SubscriptionStore, Vec<String>)> {
    if !path.exists() {
        return Ok((SubscriptionStore::new(), Vec::new()));
    }
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&data)?;
    if value.is_array() {
        return load_legacy(value);
    }
    let file: PersistedFile = serde_json::from_value(value)?;
    let mut store = SubscriptionStore::new();
    for (dest_str, record) in file.destinations {
        let destination: i64 = dest_str.parse().with_context(|| format!("destination key \"{dest_str}\" is not an integer"))?;
        for sub_record in record.subscriptions {
            let mut sub = Subscription::new(sub_record.query, destination)?;
            sub.paused = sub_record.paused;
            sub.latest_update = sub_record.latest_update.as_deref().map(parse_timestamp).transpose()?;
            store.add_subscription(sub)?;
        }
        if !record.blocklist.is_empty() {
            let queries = record.blocklist.into_iter().map(|b| b.query);
            store.set_blocklist(DestinationBlocklist::from_persisted(destination, queries)?);
        }
    }
    Ok((store, file.latest_ids))
}

fn load_legacy(value: serde_json::Value) -> anyhow::Result<(SubscriptionStore, Vec<String>)> {
    let records: Vec<LegacySubscriptionRecord> = serde_json::from_value(value)?;
    let mut store = SubscriptionStore::new();
    for record in records {
        let mut sub = Subscription::new(record.query, record.destination)?;
        sub.latest_update = record.latest_update.as_deref().map(parse_timestamp).transpose()?;
        store.add_subscription(sub)?;
    }
    Ok((store, Vec::new()))
}

/// Saves the store to `path` atomically: write to `<path>.tmp`, `fsync`,
/// then rename over the target so a crash mid-write never leaves a
/// truncated file in place.
pub fn save(store: &SubscriptionStore, latest_ids: &[String], path: &Path) -> anyhow::Result<()> {
    let mut destinations: HashMap<String, DestinationRecord> = HashMap::new();
    for sub in store.subscriptions() {
        let entry = destinations.entry(sub.destination.to_string()).or_default();
        entry.subscriptions.push(SubscriptionRecord {
            query: sub.query_str.clone(),
            latest_update: sub.latest_update.map(|t| t.to_rfc3339()),
            paused: sub.paused,
        });
    }
    for (destination, blocklist) in store.blocklists() {
        let entry = destinations.entry(destination.to_string()).or_default();
        entry.blocklist = blocklist.queries().map(|q| BlocklistRecord { query: q.to_string() }).collect();
    }
    let file = PersistedFile {
        destinations,
        latest_ids: latest_ids.to_vec(),
    };
    atomic_write(path, &file)
}

fn atomic_write(path: &Path, file: &PersistedFile) -> anyhow::Result<()> {
    let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
    let json = serde_json::to_string_pretty(file)?;
    let mut handle = File::create(&tmp_path).with_context(|| format!("creating {}", tmp_path.display()))?;
    handle.write_all(json.as_bytes())?;
    handle.sync_all()?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn round_trips_subscriptions_and_blocklist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.json");

        let mut store = SubscriptionStore::new();
        let mut sub = Subscription::new("cat", 42).unwrap();
        sub.paused = true;
        sub.latest_update = Some(parse_timestamp("2026-01-01T00:00:00Z").unwrap());
        store.add_subscription(sub).unwrap();
        store.add_to_blocklist(42, "gore").unwrap();

        save(&store, &["100".to_string(), "101".to_string()], &path).unwrap();
        assert!(!PathBuf::from(format!("{}.tmp", path.display())).exists());

        let (loaded, latest_ids) = load(&path).unwrap();
        assert_eq!(latest_ids, vec!["100".to_string(), "101".to_string()]);
        let listed = loaded.list_by_destination(42);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].paused);
        assert_eq!(loaded.list_blocklist(42), vec!["gore"]);
    }

    #[test]
    fn accepts_legacy_flat_record_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"[{"query": "cat", "destination": 7, "latest_update": null}]"#,
        )
        .unwrap();

        let (store, latest_ids) = load(&path).unwrap();
        assert!(latest_ids.is_empty());
        assert_eq!(store.list_by_destination(7).len(), 1);
    }

    #[test]
    fn missing_file_loads_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let (store, latest_ids) = load(&path).unwrap();
        assert!(store.subscriptions().is_empty());
        assert!(latest_ids.is_empty());
    }
}

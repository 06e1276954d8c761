use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::models::{Feed, FeedEntry};
use crate::pipeline::Diagnostic;
use crate::settings::Settings;

use super::error::Result;
use super::partitions::{
    encode_diagnostic_key, encode_diagnostic_prefix, encode_entry_key, encode_feed_key,
    encode_handler_key, encode_meta_key,
};

const META_SETTINGS: &str = "settings";

/// Validated handler config as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHandlerConfig {
    pub handler: String,
    pub config: Value,
    pub updated_at: DateTime<Utc>,
}

/// Result of [`FjallStore::upsert_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryUpsert {
    Created,
    /// A newer copy replaced the feed-owned fields
    Updated,
    /// The stored copy is as new or newer; nothing written
    Unchanged,
}

/// Result of [`FjallStore::put_enriched`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryWrite {
    Written,
    /// The stored entry was updated after the run read it
    Stale { updated_at: DateTime<Utc> },
}

/// Fjall-backed persistent storage
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    feeds: PartitionHandle,
    entries: PartitionHandle,
    handlers: PartitionHandle,
    diagnostics: PartitionHandle,
    metadata: PartitionHandle,
    /// Serializes read-modify-write cycles on entries
    entry_writes: Arc<Mutex<()>>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let feeds = keyspace.open_partition("feeds", PartitionCreateOptions::default())?;
        let entries = keyspace.open_partition("entries", PartitionCreateOptions::default())?;
        let handlers = keyspace.open_partition("handlers", PartitionCreateOptions::default())?;
        let diagnostics = keyspace.open_partition("diagnostics", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            feeds,
            entries,
            handlers,
            diagnostics,
            metadata,
            entry_writes: Arc::new(Mutex::new(())),
        })
    }

    fn lock_entries(&self) -> MutexGuard<'_, ()> {
        self.entry_writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T: DeserializeOwned>(partition: &PartitionHandle, key: Vec<u8>) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in partition.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    pub fn put_feed(&self, feed: &Feed) -> Result<()> {
        self.feeds
            .insert(encode_feed_key(&feed.id), serde_json::to_vec(feed)?)?;
        debug!(feed_id = %feed.id, "Stored feed");
        Ok(())
    }

    pub fn get_feed(&self, feed_id: &str) -> Result<Option<Feed>> {
        Self::read(&self.feeds, encode_feed_key(feed_id))
    }

    pub fn list_feeds(&self) -> Result<Vec<Feed>> {
        Self::read_all(&self.feeds)
    }

    fn write_entry(&self, entry: &FeedEntry) -> Result<()> {
        self.entries
            .insert(encode_entry_key(&entry.id), serde_json::to_vec(entry)?)?;
        debug!(entry_id = %entry.id, feed_id = %entry.feed_id, "Stored entry");
        Ok(())
    }

    /// Store a feed item. A newer copy of a known entry only replaces its
    /// feed-owned fields; an older or equal copy is ignored.
    pub fn upsert_entry(&self, incoming: FeedEntry) -> Result<EntryUpsert> {
        let _guard = self.lock_entries();
        match self.get_entry(&incoming.id)? {
            None => {
                self.write_entry(&incoming)?;
                Ok(EntryUpsert::Created)
            }
            Some(existing) if existing.updated_at >= incoming.updated_at => Ok(EntryUpsert::Unchanged),
            Some(mut existing) => {
                existing.apply_feed_update(incoming);
                self.write_entry(&existing)?;
                Ok(EntryUpsert::Updated)
            }
        }
    }

    /// Store enrichment output unless the entry was updated after
    /// `seen_updated_at`
    pub fn put_enriched(&self, entry: &FeedEntry, seen_updated_at: DateTime<Utc>) -> Result<EntryWrite> {
        let _guard = self.lock_entries();
        if let Some(current) = self.get_entry(&entry.id)? {
            if current.updated_at > seen_updated_at {
                return Ok(EntryWrite::Stale {
                    updated_at: current.updated_at,
                });
            }
        }
        self.write_entry(entry)?;
        Ok(EntryWrite::Written)
    }

    pub fn get_entry(&self, entry_id: &str) -> Result<Option<FeedEntry>> {
        Self::read(&self.entries, encode_entry_key(entry_id))
    }

    /// All entries, optionally restricted to one feed, newest first
    pub fn list_entries(&self, feed_id: Option<&str>) -> Result<Vec<FeedEntry>> {
        let mut entries: Vec<FeedEntry> = Self::read_all(&self.entries)?;
        if let Some(feed_id) = feed_id {
            entries.retain(|entry| entry.feed_id == feed_id);
        }
        entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(entries)
    }

    pub fn put_handler_config(&self, stored: &StoredHandlerConfig) -> Result<()> {
        self.handlers
            .insert(encode_handler_key(&stored.handler), serde_json::to_vec(stored)?)?;
        debug!(handler = %stored.handler, "Stored handler config");
        Ok(())
    }

    pub fn get_handler_config(&self, name: &str) -> Result<Option<StoredHandlerConfig>> {
        Self::read(&self.handlers, encode_handler_key(name))
    }

    pub fn list_handler_configs(&self) -> Result<Vec<StoredHandlerConfig>> {
        Self::read_all(&self.handlers)
    }

    pub fn put_settings(&self, settings: &Settings) -> Result<()> {
        self.metadata
            .insert(encode_meta_key(META_SETTINGS), serde_json::to_vec(settings)?)?;
        Ok(())
    }

    /// Raw persisted settings; decoded leniently by the settings store
    pub fn get_settings(&self) -> Result<Option<Value>> {
        Self::read(&self.metadata, encode_meta_key(META_SETTINGS))
    }

    /// Append the diagnostics of one run
    pub fn append_diagnostics(&self, diagnostics: &[Diagnostic]) -> Result<()> {
        if diagnostics.is_empty() {
            return Ok(());
        }

        let mut batch = self.keyspace.batch();
        for (index, diagnostic) in diagnostics.iter().enumerate() {
            let key = encode_diagnostic_key(&diagnostic.entry_id, &diagnostic.run_id, index);
            batch.insert(&self.diagnostics, key, serde_json::to_vec(diagnostic)?);
        }
        batch.commit()?;

        debug!(
            entry_id = %diagnostics[0].entry_id,
            count = diagnostics.len(),
            "Stored diagnostics"
        );
        Ok(())
    }

    /// Diagnostics of one entry, oldest run first
    pub fn list_diagnostics(&self, entry_id: &str) -> Result<Vec<Diagnostic>> {
        let mut results = Vec::new();
        for item in self.diagnostics.prefix(encode_diagnostic_prefix(entry_id)) {
            let (_, value) = item?;
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Record counts (for the health endpoint)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        for item in self.feeds.iter() {
            item?;
            stats.feed_count += 1;
        }

        for item in self.entries.iter() {
            item?;
            stats.entry_count += 1;
        }

        for item in self.handlers.iter() {
            item?;
            stats.handler_config_count += 1;
        }

        Ok(stats)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub feed_count: usize,
    pub entry_count: usize,
    pub handler_config_count: usize,
}

//! Audit store
//!
//! Messages, events and health snapshots are written here for audit. The
//! fabric treats the store as best-effort: a failed write is logged and the
//! in-memory operation carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A stored key/value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Record key
    pub key: String,
    /// Record value
    pub value: serde_json::Value,
}

/// Persistent key/value store used for audit trails
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Write a value, optionally expiring after `ttl`
    async fn put(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()>;

    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Case-insensitive substring search over keys and values
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Records whose key starts with `prefix`, in key order
    async fn list_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<StoredRecord>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory store with TTL expiry
///
/// Expired entries are invisible to reads and reclaimed by
/// [`MemoryStore::cleanup_expired`]. Data does not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing in-memory audit store");
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Whether the store holds no live entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Cleaned up expired store entries");
        }
        removed
    }
}

fn expiry(ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
    ttl.map(|ttl| {
        chrono::Duration::from_std(ttl)
            .map(|d| Utc::now() + d)
            .map_err(|e| Error::Store(format!("invalid ttl: {}", e)))
    })
    .transpose()
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn put(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry(ttl)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        let now = Utc::now();
        let needle = query.to_lowercase();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .filter(|(k, e)| {
                k.to_lowercase().contains(&needle)
                    || e.value.to_string().to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|(k, e)| StoredRecord {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect())
    }

    async fn list_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .take(limit)
            .map(|(k, e)| StoredRecord {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect())
    }
}

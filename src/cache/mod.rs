//! Local cache of prior API responses
//!
//! Entries are keyed by [`RequestKey`] and never mutated once written; a
//! newer successful call for the same key replaces the stored entry.
//! Whether an entry is still fresh enough is decided by the caller at read
//! time, stores never expire anything on their own.

pub mod file_store;
pub mod memory_store;
pub mod stats;

use crate::error::CacheError;
use crate::payload::Payload;
use crate::request_key::RequestKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file_store::FileCacheStore;
pub use memory_store::MemoryCacheStore;
pub use stats::CacheStats;

/// A stored API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
    /// Revision indicator reported by the API, when it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
}

impl CacheEntry {
    pub fn new(key: RequestKey, payload: Payload, fetched_at: DateTime<Utc>) -> Self {
        Self {
            key,
            payload,
            fetched_at,
            source_version: None,
        }
    }

    pub fn with_source_version(mut self, version: Option<String>) -> Self {
        self.source_version = version;
        self
    }
}

/// Summary of a stored entry, as shown by `cache list`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySummary {
    pub key: RequestKey,
    pub fetched_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Keyed, durable storage of [`CacheEntry`] values.
///
/// Implementations are shared between concurrent planner tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `entry`, replacing any entry with the same key.
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Exact lookup. `Ok(None)` is a miss.
    async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Every entry whose key covers `request`, freshest first.
    async fn list_covering(&self, request: &RequestKey) -> Result<Vec<CacheEntry>, CacheError>;

    /// All stored entries, freshest first.
    async fn list(&self) -> Result<Vec<EntrySummary>, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Finish any pending persistence. Called at the end of a run.
    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Sort entries freshest first; ties broken by key for a stable order.
pub(crate) fn sort_freshest_first(entries: &mut [CacheEntry]) {
    entries.sort_by(|a, b| {
        b.fetched_at
            .cmp(&a.fetched_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}

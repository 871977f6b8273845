use super::{sort_freshest_first, CacheEntry, CacheStats, CacheStore, EntrySummary};
use crate::error::CacheError;
use crate::request_key::RequestKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory store with the same contract as [`super::FileCacheStore`].
/// Nothing survives the process; used in tests and dry runs.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<RequestKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn entry_size(entry: &CacheEntry) -> u64 {
    serde_json::to_vec(entry).map(|v| v.len() as u64).unwrap_or(0)
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.lock().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn list_covering(&self, request: &RequestKey) -> Result<Vec<CacheEntry>, CacheError> {
        let mut covering: Vec<CacheEntry> = self
            .lock()
            .values()
            .filter(|e| e.key.covers(request))
            .cloned()
            .collect();
        sort_freshest_first(&mut covering);
        Ok(covering)
    }

    async fn list(&self) -> Result<Vec<EntrySummary>, CacheError> {
        let mut entries: Vec<CacheEntry> = self.lock().values().cloned().collect();
        sort_freshest_first(&mut entries);
        Ok(entries
            .iter()
            .map(|e| EntrySummary {
                key: e.key.clone(),
                fetched_at: e.fetched_at,
                size_bytes: entry_size(e),
            })
            .collect())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.lock();
        Ok(CacheStats {
            total_entries: entries.len(),
            total_size_bytes: entries.values().map(entry_size).sum(),
            discarded_entries: 0,
            oldest_entry: entries.values().map(|e| e.fetched_at).min(),
            newest_entry: entries.values().map(|e| e.fetched_at).max(),
        })
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.lock().clear();
        Ok(())
    }
}

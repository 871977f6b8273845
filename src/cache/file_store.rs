use super::{sort_freshest_first, CacheEntry, CacheStats, CacheStore, EntrySummary};
use crate::error::CacheError;
use crate::request_key::RequestKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;
const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// On-disk document, one per entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    format_version: u32,
    #[serde(flatten)]
    entry: CacheEntry,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    fetched_at: DateTime<Utc>,
    path: PathBuf,
    size_bytes: u64,
}

/// Durable cache: one JSON document per entry under `<dir>/entries`,
/// named by the SHA-256 digest of the request key.
///
/// The directory is scanned on open to build an in-memory index. A file that
/// cannot be decoded is skipped and counted as discarded; it never prevents
/// the rest of the store from loading.
pub struct FileCacheStore {
    entries_dir: PathBuf,
    index: Mutex<HashMap<RequestKey, IndexEntry>>,
    discarded: AtomicUsize,
}

impl FileCacheStore {
    pub async fn open(cache_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let entries_dir = cache_dir.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)
            .await
            .map_err(|e| CacheError::io(entries_dir.display(), e))?;

        let store = Self {
            entries_dir,
            index: Mutex::new(HashMap::new()),
            discarded: AtomicUsize::new(0),
        };
        store.rebuild_index().await?;
        Ok(store)
    }

    pub fn entries_dir(&self) -> &Path {
        &self.entries_dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestKey, IndexEntry>> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.entries_dir
            .join(format!("{}.{}", key.digest(), ENTRY_EXTENSION))
    }

    async fn rebuild_index(&self) -> Result<(), CacheError> {
        let mut dir = fs::read_dir(&self.entries_dir)
            .await
            .map_err(|e| CacheError::io(self.entries_dir.display(), e))?;

        let mut loaded = HashMap::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(self.entries_dir.display(), e))?
        {
            let path = item.path();
            if path.extension().map_or(true, |ext| ext != ENTRY_EXTENSION) {
                continue;
            }

            match read_entry(&path).await {
                Ok(None) => continue,
                Ok(Some((entry, size_bytes))) => {
                    loaded.insert(
                        entry.key.clone(),
                        IndexEntry {
                            fetched_at: entry.fetched_at,
                            path,
                            size_bytes,
                        },
                    );
                }
                Err(CacheError::Inconsistent { path, message }) => {
                    warn!(target: "cache", "Discarding unreadable cache entry {}: {}", path, message);
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            target: "cache",
            "Opened cache at {:?} with {} entries ({} discarded)",
            self.entries_dir,
            loaded.len(),
            self.discarded.load(Ordering::Relaxed)
        );
        *self.lock() = loaded;
        Ok(())
    }

    /// Read a stored entry, dropping it from the index if it is gone or
    /// no longer decodes.
    async fn load(&self, key: &RequestKey, path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        match read_entry(path).await {
            Ok(Some((entry, _))) if &entry.key == key => Ok(Some(entry)),
            Ok(Some((entry, _))) => {
                warn!(
                    target: "cache",
                    "Cache file {:?} holds {} instead of {}, discarding",
                    path, entry.key, key
                );
                self.discard(key, path).await;
                Ok(None)
            }
            Err(CacheError::Inconsistent { message, .. }) => {
                warn!(target: "cache", "Discarding inconsistent entry for {}: {}", key, message);
                self.discard(key, path).await;
                Ok(None)
            }
            Ok(None) => {
                debug!(target: "cache", "Cache file for {} vanished", key);
                self.lock().remove(key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn discard(&self, key: &RequestKey, path: &Path) {
        self.lock().remove(key);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = fs::remove_file(path).await {
            debug!(target: "cache", "Could not remove {:?}: {}", path, e);
        }
    }
}

/// `Ok(None)` when the file no longer exists.
async fn read_entry(path: &Path) -> Result<Option<(CacheEntry, u64)>, CacheError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path.display(), e)),
    };
    let stored: StoredEntry = serde_json::from_slice(&bytes)
        .map_err(|e| CacheError::inconsistent(path.display(), e))?;
    if stored.format_version != FORMAT_VERSION {
        return Err(CacheError::inconsistent(
            path.display(),
            format!("unsupported format version {}", stored.format_version),
        ));
    }
    Ok(Some((stored.entry, bytes.len() as u64)))
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(&entry.key);
        let temp_path = path.with_extension(TEMP_EXTENSION);
        let stored = StoredEntry {
            format_version: FORMAT_VERSION,
            entry,
        };
        let json = serde_json::to_vec_pretty(&stored)
            .map_err(|e| CacheError::io(path.display(), e))?;

        // Write-then-rename so a live name never points at a partial file
        fs::write(&temp_path, &json)
            .await
            .map_err(|e| CacheError::io(temp_path.display(), e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| CacheError::io(path.display(), e))?;

        debug!(target: "cache", "Stored {} ({} bytes)", stored.entry.key, json.len());
        self.lock().insert(
            stored.entry.key,
            IndexEntry {
                fetched_at: stored.entry.fetched_at,
                path,
                size_bytes: json.len() as u64,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = match self.lock().get(key) {
            Some(indexed) => indexed.path.clone(),
            None => return Ok(None),
        };
        self.load(key, &path).await
    }

    async fn list_covering(&self, request: &RequestKey) -> Result<Vec<CacheEntry>, CacheError> {
        let candidates: Vec<(RequestKey, PathBuf)> = self
            .lock()
            .iter()
            .filter(|(key, _)| key.covers(request))
            .map(|(key, indexed)| (key.clone(), indexed.path.clone()))
            .collect();

        let mut covering = Vec::with_capacity(candidates.len());
        for (key, path) in candidates {
            match self.load(&key, &path).await {
                Ok(Some(entry)) => covering.push(entry),
                Ok(None) => {}
                Err(e) => warn!(target: "cache", "Skipping covering entry {}: {}", key, e),
            }
        }
        sort_freshest_first(&mut covering);
        Ok(covering)
    }

    async fn list(&self) -> Result<Vec<EntrySummary>, CacheError> {
        let mut summaries: Vec<EntrySummary> = self
            .lock()
            .iter()
            .map(|(key, indexed)| EntrySummary {
                key: key.clone(),
                fetched_at: indexed.fetched_at,
                size_bytes: indexed.size_bytes,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.fetched_at
                .cmp(&a.fetched_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(summaries)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let index = self.lock();
        Ok(CacheStats {
            total_entries: index.len(),
            total_size_bytes: index.values().map(|e| e.size_bytes).sum(),
            discarded_entries: self.discarded.load(Ordering::Relaxed),
            oldest_entry: index.values().map(|e| e.fetched_at).min(),
            newest_entry: index.values().map(|e| e.fetched_at).max(),
        })
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut dir = fs::read_dir(&self.entries_dir)
            .await
            .map_err(|e| CacheError::io(self.entries_dir.display(), e))?;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(self.entries_dir.display(), e))?
        {
            let path = item.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some(ENTRY_EXTENSION) || ext == Some(TEMP_EXTENSION) {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| CacheError::io(path.display(), e))?;
            }
        }
        self.lock().clear();
        self.discarded.store(0, Ordering::Relaxed);
        info!(target: "cache", "Cleared cache at {:?}", self.entries_dir);
        Ok(())
    }

    /// Sweep temporary files left behind by interrupted writes.
    async fn flush(&self) -> Result<(), CacheError> {
        let mut dir = fs::read_dir(&self.entries_dir)
            .await
            .map_err(|e| CacheError::io(self.entries_dir.display(), e))?;
        let mut swept = 0usize;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(self.entries_dir.display(), e))?
        {
            let path = item.path();
            if path.extension().map_or(false, |ext| ext == TEMP_EXTENSION)
                && fs::remove_file(&path).await.is_ok()
            {
                swept += 1;
            }
        }
        debug!(
            target: "cache",
            "Flushed cache: {} entries, {} temp files swept",
            self.lock().len(),
            swept
        );
        Ok(())
    }
}

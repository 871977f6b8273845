#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dtools_export::api::{ApiClient, FetchedRecord, UsageLedger};
use dtools_export::cache::{CacheEntry, CacheStats, CacheStore, EntrySummary, MemoryCacheStore};
use dtools_export::error::{CacheError, LiveCallError};
use dtools_export::payload::{FieldValue, Payload};
use dtools_export::request_key::{RequestDescriptor, RequestKey};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub const ENDPOINT: &str = "Projects/GetProject";

/// API stand-in that answers every requested field with
/// `<field>-<id>-v<generation>` and counts the calls it receives.
pub struct MockApiClient {
    calls: AtomicUsize,
    generation: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
    omitted_fields: Mutex<HashSet<String>>,
    gate: watch::Sender<bool>,
    requests: Mutex<Vec<RequestDescriptor>>,
    listing: Mutex<Option<(String, String, Value)>>,
    usage: Option<Arc<Mutex<UsageLedger>>>,
}

impl MockApiClient {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            calls: AtomicUsize::new(0),
            generation: AtomicUsize::new(1),
            failing_ids: Mutex::new(HashSet::new()),
            omitted_fields: Mutex::new(HashSet::new()),
            gate,
            requests: Mutex::new(Vec::new()),
            listing: Mutex::new(None),
            usage: None,
        }
    }

    /// Record every call in `usage`, refusing calls past its budget.
    pub fn with_usage(mut self, usage: Arc<Mutex<UsageLedger>>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Answer calls to `endpoint` with `items` under `field`.
    pub fn with_listing(self, endpoint: &str, field: &str, items: Value) -> Self {
        *self.listing.lock().unwrap() = Some((endpoint.to_string(), field.to_string(), items));
        self
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    /// Calls block until [`MockApiClient::open_gate`].
    pub fn gated() -> Self {
        let client = Self::new();
        client.gate.send_replace(false);
        client
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make later answers distinguishable from earlier ones.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// Leave `field` out of every answer.
    pub fn omit_field(&self, field: &str) {
        self.omitted_fields.lock().unwrap().insert(field.to_string());
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<FetchedRecord, LiveCallError> {
        if let Some(usage) = &self.usage {
            usage.lock().unwrap().try_record_call()?;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let listing = self.listing.lock().unwrap().clone();
        if let Some((endpoint, field, items)) = listing {
            if request.endpoint == endpoint {
                let mut payload = Payload::new();
                payload.insert(field, FieldValue::from_json(&items));
                return Ok(FetchedRecord::new(payload));
            }
        }

        let id = request
            .scope
            .iter()
            .find(|(name, _)| name == "id")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        if self.failing_ids.lock().unwrap().contains(&id) {
            return Err(LiveCallError::Status {
                status: 404,
                body: format!("no project {}", id),
            });
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let omitted = self.omitted_fields.lock().unwrap().clone();
        let payload = request
            .fields
            .iter()
            .filter(|f| !omitted.contains(*f))
            .map(|f| {
                (
                    f.clone(),
                    FieldValue::Text(format!("{}-{}-v{}", f, id, generation)),
                )
            })
            .collect();
        Ok(FetchedRecord {
            payload,
            source_version: Some(format!("v{}", generation)),
        })
    }
}

pub fn key(fields: &[&str], id: &str) -> RequestKey {
    RequestKey::new(ENDPOINT, fields.iter().copied(), [("id", id)])
}

/// Cached entry for `fields` of record `id`, fetched `age` ago.
pub fn cached_entry(fields: &[&str], id: &str, age: Duration) -> CacheEntry {
    let payload: Payload = fields
        .iter()
        .map(|f| (f.to_string(), FieldValue::Text(format!("{}-{}-cached", f, id))))
        .collect();
    CacheEntry::new(key(fields, id), payload, ago(age))
}

pub fn ago(age: Duration) -> DateTime<Utc> {
    Utc::now() - age
}

/// Store whose reads or writes fail on demand; otherwise behaves like the
/// wrapped in-memory store.
#[derive(Default)]
pub struct FailingCacheStore {
    pub inner: MemoryCacheStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read_error(&self) -> Result<(), CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::io("entries", "disk unreadable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::io("entries", "disk full"));
        }
        self.inner.put(entry).await
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        self.read_error()?;
        self.inner.get(key).await
    }

    async fn list_covering(&self, request: &RequestKey) -> Result<Vec<CacheEntry>, CacheError> {
        self.read_error()?;
        self.inner.list_covering(request).await
    }

    async fn list(&self) -> Result<Vec<EntrySummary>, CacheError> {
        self.inner.list().await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.inner.stats().await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }
}

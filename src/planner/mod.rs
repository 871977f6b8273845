//! Call planner
//!
//! Decides, per record of a selection, whether a cached entry may stand in
//! for a live call, issues the live calls that remain and tags every result
//! with where its data came from.
//!
//! A record is always served whole from a single source. Fields of one
//! record are never spliced together from a cached entry and a live call.

pub mod control;
pub mod single_flight;

use crate::api::ApiClient;
use crate::cache::{CacheEntry, CacheStore};
use crate::error::{LiveCallError, PlanError};
use crate::freshness::FreshnessPolicy;
use crate::request_key::{RequestDescriptor, RequestKey};
use crate::selection::Selection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use control::RunControl;
pub use single_flight::{Role, SingleFlight};

/// Where the data of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cached,
    Live,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Cached => f.write_str("cached"),
            Provenance::Live => f.write_str("live"),
        }
    }
}

/// Per-run planning options.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub freshness: FreshnessPolicy,
    /// Allow one export to combine cached records with live ones. When off,
    /// a single record needing a live call sends the whole run live.
    pub allow_mixing: bool,
    /// Upper bound on live calls running at once
    pub max_concurrent: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            freshness: FreshnessPolicy::default(),
            allow_mixing: false,
            max_concurrent: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRecord {
    pub entry: Arc<CacheEntry>,
    pub provenance: Provenance,
}

impl PlannedRecord {
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.entry.fetched_at
    }
}

/// Result for one requested record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerResult {
    pub key: RequestKey,
    pub outcome: Result<PlannedRecord, PlanError>,
}

impl PlannerResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Counters since the planner was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlannerStats {
    pub cache_hits: u64,
    /// Live calls this planner started
    pub live_calls: u64,
    /// Requests that attached to a call already in flight
    pub joined_calls: u64,
    pub failures: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct StatCounters {
    cache_hits: AtomicU64,
    live_calls: AtomicU64,
    joined_calls: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Clone)]
pub struct CallPlanner {
    store: Arc<dyn CacheStore>,
    client: Arc<dyn ApiClient>,
    flights: SingleFlight,
    counters: Arc<StatCounters>,
}

impl CallPlanner {
    pub fn new(store: Arc<dyn CacheStore>, client: Arc<dyn ApiClient>) -> Self {
        Self {
            store,
            client,
            flights: SingleFlight::new(),
            counters: Arc::new(StatCounters::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn stats(&self) -> PlannerStats {
        PlannerStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            live_calls: self.counters.live_calls.load(Ordering::Relaxed),
            joined_calls: self.counters.joined_calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Freshest covering entry that `policy` accepts at `now`.
    ///
    /// A storage error is logged and treated as a miss so the caller falls
    /// back to a live call.
    pub async fn lookup(
        &self,
        key: &RequestKey,
        policy: &FreshnessPolicy,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        if *policy == FreshnessPolicy::ExactOnly {
            return None;
        }

        match self.store.list_covering(key).await {
            Ok(covering) => {
                let freshest = covering.into_iter().next()?;
                if policy.accepts(freshest.fetched_at, now) {
                    debug!(
                        target: "planner",
                        "Cache hit for {} (fetched {})",
                        key, freshest.fetched_at
                    );
                    Some(freshest)
                } else {
                    debug!(
                        target: "planner",
                        "Cached entry for {} from {} rejected by {}",
                        key, freshest.fetched_at, policy
                    );
                    None
                }
            }
            Err(e) => {
                warn!(target: "planner", "Cache read failed for {}, going live: {}", key, e);
                None
            }
        }
    }

    /// Plan every record of `selection`. Results come back in the order the
    /// records were requested, whatever order the live calls finish in.
    pub async fn plan(
        &self,
        selection: &Selection,
        options: &PlanOptions,
        control: &RunControl,
    ) -> Vec<PlannerResult> {
        if selection.is_empty() {
            debug!(target: "planner", "Empty selection, nothing to plan");
            return Vec::new();
        }

        let keys = selection.request_keys();
        let now = Utc::now();

        // 1. Cache lookups
        let mut hits = Vec::with_capacity(keys.len());
        for key in &keys {
            hits.push(self.lookup(key, &options.freshness, now).await);
        }

        // 2. Without mixing, one miss sends the whole run live
        let misses = hits.iter().filter(|h| h.is_none()).count();
        if misses > 0
            && misses < hits.len()
            && !options.allow_mixing
            && !options.freshness.is_any_age()
        {
            info!(
                target: "planner",
                "{} of {} records need a live call; refreshing all of them",
                misses,
                hits.len()
            );
            hits.iter_mut().for_each(|h| *h = None);
        }

        // 3. Live calls for the rest
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        let mut results: Vec<Option<PlannerResult>> = (0..keys.len()).map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, (key, hit)) in keys.iter().cloned().zip(hits).enumerate() {
            match hit {
                Some(entry) => {
                    bump(&self.counters.cache_hits);
                    results[index] = Some(PlannerResult {
                        key,
                        outcome: Ok(PlannedRecord {
                            entry: Arc::new(entry),
                            provenance: Provenance::Cached,
                        }),
                    });
                }
                None => {
                    let planner = self.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let control = control.clone();
                    tasks.spawn(async move {
                        let outcome = planner.fetch_live(&key, &semaphore, &control).await;
                        (index, PlannerResult { key, outcome })
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(target: "planner", "Planner task failed: {}", e),
            }
        }

        let results: Vec<PlannerResult> = results
            .into_iter()
            .zip(keys)
            .map(|(result, key)| {
                result.unwrap_or_else(|| PlannerResult {
                    key,
                    outcome: Err(PlanError::Live(LiveCallError::Network(
                        "planner task aborted".to_string(),
                    ))),
                })
            })
            .collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        info!(
            target: "planner",
            "Planned {} records: {} ok, {} failed",
            results.len(),
            ok,
            results.len() - ok
        );
        results
    }

    async fn fetch_live(
        &self,
        key: &RequestKey,
        semaphore: &Semaphore,
        control: &RunControl,
    ) -> Result<PlannedRecord, PlanError> {
        let _permit = semaphore.acquire().await.map_err(|_| PlanError::Cancelled)?;

        let store = Arc::clone(&self.store);
        let client = Arc::clone(&self.client);
        let owned_key = key.clone();
        let flight = self
            .flights
            .run(key, !control.is_cancelled(), move || async move {
                let descriptor = RequestDescriptor::from(&owned_key);
                let fetched = match client.fetch(&descriptor).await {
                    Ok(fetched) => fetched,
                    Err(e) => return Err(e),
                };
                let entry = CacheEntry::new(owned_key, fetched.payload, Utc::now())
                    .with_source_version(fetched.source_version);
                if let Err(e) = store.put(entry.clone()).await {
                    warn!(
                        target: "cache",
                        "Could not persist {}, continuing with fetched data: {}",
                        entry.key, e
                    );
                }
                Ok(Arc::new(entry))
            })
            .await;

        let (outcome, role) = match flight {
            Some(flight) => flight,
            None => {
                bump(&self.counters.cancelled);
                debug!(target: "planner", "Run cancelled, skipping {}", key);
                return Err(PlanError::Cancelled);
            }
        };

        match role {
            Role::Leader => bump(&self.counters.live_calls),
            Role::Follower => bump(&self.counters.joined_calls),
        }

        match outcome {
            Ok(entry) => Ok(PlannedRecord {
                entry,
                provenance: Provenance::Live,
            }),
            Err(e) => {
                bump(&self.counters.failures);
                warn!(target: "planner", "Live call for {} failed: {}", key, e);
                Err(PlanError::Live(e))
            }
        }
    }
}

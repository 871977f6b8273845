use crate::cache::CacheEntry;
use crate::error::LiveCallError;
use crate::request_key::RequestKey;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome of a live call, shared by every caller waiting on it.
pub type SharedOutcome = Result<Arc<CacheEntry>, LiveCallError>;

type Pending = watch::Receiver<Option<SharedOutcome>>;

/// Whether the caller started the call or attached to one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Registry of live calls in flight, keyed by request key.
///
/// The first caller for a key spawns the call on its own task; later callers
/// wait on the same `watch` channel. Because the call runs detached it
/// completes (and can populate the cache) even if every waiter goes away.
#[derive(Clone, Default)]
pub struct SingleFlight {
    inflight: Arc<Mutex<HashMap<RequestKey, Pending>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a call currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Wait for the call for `key`, starting it with `call` if none is
    /// running and `may_start` is set. Returns `None` when nothing was
    /// running and starting was not allowed.
    pub async fn run<F, Fut>(
        &self,
        key: &RequestKey,
        may_start: bool,
        call: F,
    ) -> Option<(SharedOutcome, Role)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SharedOutcome> + Send + 'static,
    {
        let (mut pending, role) = {
            let mut inflight = lock(&self.inflight);
            if let Some(pending) = inflight.get(key) {
                debug!(target: "planner", "Joining in-flight call for {}", key);
                (pending.clone(), Role::Follower)
            } else if !may_start {
                return None;
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(key.clone(), rx.clone());

                let registration = Registration {
                    registry: Arc::clone(&self.inflight),
                    key: key.clone(),
                };
                let fut = call();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    // Publish before deregistering so a late joiner still sees the value
                    let _ = tx.send(Some(outcome));
                    drop(registration);
                });
                (rx, Role::Leader)
            }
        };

        let outcome = match pending.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        let outcome = outcome.unwrap_or_else(|| {
            warn!(target: "planner", "In-flight call for {} ended without a result", key);
            Err(LiveCallError::Network("in-flight call aborted".to_string()))
        });
        Some((outcome, role))
    }
}

/// Removes the key from the registry when the call task ends, including by
/// panic, so the next request for it starts a fresh call.
struct Registration {
    registry: Arc<Mutex<HashMap<RequestKey, Pending>>>,
    key: RequestKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.key);
    }
}

fn lock(
    inflight: &Mutex<HashMap<RequestKey, Pending>>,
) -> std::sync::MutexGuard<'_, HashMap<RequestKey, Pending>> {
    inflight.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn key(id: &str) -> RequestKey {
        RequestKey::new("Quotes/GetQuote", ["name"], [("id", id)])
    }

    #[tokio::test]
    async fn test_followers_share_one_call() {
        let flights = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                flights
                    .run(&key("1"), true, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, LiveCallError>(Arc::new(CacheEntry::new(
                            key("1"),
                            Payload::new(),
                            Utc::now(),
                        )))
                    })
                    .await
            }));
        }

        while flights.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        // Let every task reach the registry before releasing the call
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let mut leaders = 0;
        for handle in handles {
            let (outcome, role) = handle.await.unwrap().unwrap();
            assert!(outcome.is_ok());
            if role == Role::Leader {
                leaders += 1;
            }
        }
        assert_eq!(leaders, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_may_not_start() {
        let flights = SingleFlight::new();
        let outcome = flights
            .run(&key("2"), false, || async {
                Err::<Arc<CacheEntry>, _>(LiveCallError::RateLimited)
            })
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_panicking_call_releases_its_key() {
        let flights = SingleFlight::new();
        let (outcome, role) = flights
            .run(&key("4"), true, || async {
                if true {
                    panic!("call blew up");
                }
                Err::<Arc<CacheEntry>, _>(LiveCallError::RateLimited)
            })
            .await
            .unwrap();
        assert_eq!(role, Role::Leader);
        assert!(matches!(outcome, Err(LiveCallError::Network(_))));
        while flights.in_flight() > 0 {
            tokio::task::yield_now().await;
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let (outcome, role) = flights
            .run(&key("4"), true, move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, LiveCallError>(Arc::new(CacheEntry::new(
                    key("4"),
                    Payload::new(),
                    Utc::now(),
                )))
            })
            .await
            .unwrap();
        assert_eq!(role, Role::Leader);
        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let flights = SingleFlight::new();
        let (outcome, role) = flights
            .run(&key("3"), true, || async {
                Err::<Arc<CacheEntry>, _>(LiveCallError::RateLimited)
            })
            .await
            .unwrap();
        assert_eq!(role, Role::Leader);
        assert_eq!(outcome.unwrap_err(), LiveCallError::RateLimited);
    }
}

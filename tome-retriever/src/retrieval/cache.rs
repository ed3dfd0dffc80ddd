//! Memory-tier index cache with per-key build coordination.
//!
//! Resolution order for a key: fresh memory entry → persisted entry on disk
//! (promoted with a fresh timestamp) → build from source paths (persisted
//! afterwards when requested). Concurrent misses on the same key share one
//! flight: the first caller spawns a detached task holding the key's
//! in-flight slot, and every caller (including ones that arrive mid-build)
//! awaits the same result over a watch channel. Flights for different keys
//! never serialize against each other; the entry and in-flight maps are only
//! locked for the few instructions it takes to look up or insert a key.
//!
//! The flight task is detached on purpose: a caller abandoning its request
//! must not cancel a build other waiters share, and even with no waiters
//! left the finished build still populates the cache for future use.
//! Failures are broadcast to all waiters and never cached.

use crate::error::{RetrieveError, Result};
use crate::retrieval::vector_index::VectorIndex;
use crate::storage::store::{PersistentStore, StoreMetadata};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A live index resolved from the cache chain.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Canonical cache key of the document-path set.
    pub key: String,
    /// The index handle; shared by every request using this entry.
    pub index: Arc<VectorIndex>,
    /// Snapshot of the source-document metadata recorded at build time.
    pub metadata: StoreMetadata,
    /// When this entry became live in memory.
    pub created_at: Instant,
}

impl CacheEntry {
    /// An entry is fresh while `now - created_at < ttl` (strict: an entry is
    /// already stale at exactly `created_at + ttl`).
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) < ttl
    }
}

/// Future type produced by the build callback handed to [`IndexCache::resolve`].
pub type BuildFuture =
    Pin<Box<dyn Future<Output = Result<(VectorIndex, StoreMetadata)>> + Send + 'static>>;

type FlightResult = Result<CacheEntry>;
type FlightReceiver = watch::Receiver<Option<FlightResult>>;

/// TTL-bounded mapping from cache key to a live index, with at-most-one
/// concurrent build per key.
pub struct IndexCache {
    ttl: Duration,
    timeout: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, FlightReceiver>>,
}

impl IndexCache {
    pub fn new(ttl: Duration, timeout: Duration) -> Self {
        Self {
            ttl,
            timeout,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve `key` to a live entry via the memory → disk → build chain.
    ///
    /// `build` is only invoked on a full miss, and at most once per key no
    /// matter how many callers race. When `store` is given, a persisted
    /// entry under the current `model_id` is preferred over building, and a
    /// fresh build is persisted back when `persist` is set. An untrusted
    /// persisted entry (corrupt, model mismatch) falls back to building; if
    /// that build fails too, the original load error is surfaced.
    pub async fn resolve<F>(
        self: &Arc<Self>,
        key: &str,
        store: Option<Arc<PersistentStore>>,
        model_id: String,
        persist: bool,
        build: F,
    ) -> FlightResult
    where
        F: FnOnce() -> BuildFuture + Send + 'static,
    {
        if let Some(entry) = self.fresh_entry(key) {
            debug!("cache hit for {key:?}");
            return Ok(entry);
        }

        let mut receiver = self.join_or_spawn_flight(key, store, model_id, persist, build);

        // The watch always holds the flight's final result once it is sent;
        // a waiter joining late sees it immediately via borrow().
        loop {
            if let Some(result) = receiver.borrow().clone() {
                return result;
            }
            if receiver.changed().await.is_err() {
                // Flight task died without reporting (panic); surface as a
                // build failure rather than hanging callers.
                return Err(RetrieveError::build(
                    key,
                    crate::error::BuildStage::Index,
                    "index build task terminated unexpectedly",
                ));
            }
        }
    }

    /// Remove the memory entry for a key, leaving disk untouched. Returns
    /// whether an entry existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.lock().unwrap().remove(key).is_some();
        if removed {
            info!("invalidated cached index for {key:?}");
        }
        removed
    }

    /// Remove every memory entry, leaving disk untouched. Returns how many
    /// entries were dropped.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();
        entries.clear();
        if count > 0 {
            info!("invalidated all {count} cached indices");
        }
        count
    }

    /// Insert (or replace) a live entry directly; used after force rebuilds.
    pub fn insert(&self, entry: CacheEntry) {
        self.entries.lock().unwrap().insert(entry.key.clone(), entry);
    }

    /// Keys currently live in memory (fresh or not), sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn fresh_entry(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| e.is_fresh(Instant::now(), self.ttl))
            .cloned()
    }

    /// Join the key's in-flight build, or spawn one if none is running.
    /// The in-flight map lock is the per-key build lock: it is held only to
    /// look up / insert the slot, never across the build itself.
    fn join_or_spawn_flight<F>(
        self: &Arc<Self>,
        key: &str,
        store: Option<Arc<PersistentStore>>,
        model_id: String,
        persist: bool,
        build: F,
    ) -> FlightReceiver
    where
        F: FnOnce() -> BuildFuture + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(receiver) = inflight.get(key) {
            debug!("joining in-flight build for {key:?}");
            return receiver.clone();
        }

        let (sender, receiver) = watch::channel(None);
        inflight.insert(key.to_string(), receiver.clone());
        drop(inflight);

        let cache = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            let result = tokio::time::timeout(
                cache.timeout,
                cache.run_flight(&key, store, &model_id, persist, build),
            )
            .await
            .unwrap_or_else(|_| {
                Err(RetrieveError::Timeout {
                    key: key.clone(),
                    seconds: cache.timeout.as_secs(),
                })
            });

            if let Ok(entry) = &result {
                cache
                    .entries
                    .lock()
                    .unwrap()
                    .insert(key.clone(), entry.clone());
            }
            cache.inflight.lock().unwrap().remove(&key);
            // Receivers may all be gone if every caller was cancelled; the
            // cache is populated regardless.
            let _ = sender.send(Some(result));
        });

        receiver
    }

    async fn run_flight<F>(
        self: &Arc<Self>,
        key: &str,
        store: Option<Arc<PersistentStore>>,
        model_id: &str,
        persist: bool,
        build: F,
    ) -> FlightResult
    where
        F: FnOnce() -> BuildFuture + Send + 'static,
    {
        // Another flight may have populated the entry between our fast-path
        // check and this task starting.
        if let Some(entry) = self.fresh_entry(key) {
            return Ok(entry);
        }

        // Disk tier: promote a trusted persisted entry with a fresh TTL.
        let mut fallback_cause: Option<RetrieveError> = None;
        if let Some(store) = store.as_ref() {
            match store.load(key, model_id).await {
                Ok((index, metadata)) => {
                    info!("promoted persisted index for {key:?} into memory");
                    return Ok(CacheEntry {
                        key: key.to_string(),
                        index: Arc::new(index),
                        metadata,
                        created_at: Instant::now(),
                    });
                }
                Err(RetrieveError::PersistMissing { .. }) => {}
                Err(e) if e.is_untrusted_persist() => {
                    warn!("persisted index for {key:?} rejected ({e}); rebuilding from source");
                    fallback_cause = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Build tier.
        let built = build().await;
        let (index, metadata) = match built {
            Ok(parts) => parts,
            Err(build_err) => {
                // When a rejected persisted entry forced this build, the
                // original rejection is the more truthful cause.
                return Err(match fallback_cause {
                    Some(original) => {
                        warn!("fallback rebuild for {key:?} also failed: {build_err}");
                        original
                    }
                    None => build_err,
                });
            }
        };

        if persist {
            if let Some(store) = store.as_ref() {
                // A failed save leaves the request servable from memory;
                // the next process restart just rebuilds.
                if let Err(e) = store.save(key, &index, &metadata).await {
                    warn!("failed to persist index for {key:?}: {e}");
                }
            }
        }

        Ok(CacheEntry {
            key: key.to_string(),
            index: Arc::new(index),
            metadata,
            created_at: Instant::now(),
        })
    }
}

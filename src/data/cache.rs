//! TTL caching for race contexts.
//!
//! Live Monitor may evaluate the same product several times a minute; the
//! cache keeps provider load bounded while the TTL keeps pool totals close
//! to current. Candidate listings are never cached.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::RaceDataSource;
use crate::types::{PlannerError, RaceCandidate, RaceContext};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// In-memory TTL cache with a hard entry cap.
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).and_then(|entry| {
            if Utc::now() - entry.inserted_at < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Insert, evicting expired entries first and then the oldest if full.
    pub fn insert(&mut self, key: String, value: V) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                if let Some(oldest) = self
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Utc::now(),
            },
        );
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove expired entries.
    pub fn evict_expired(&mut self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.inserted_at < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cached source
// ---------------------------------------------------------------------------

/// Race source that memoises `race_context` for the cache TTL.
pub struct CachedRaceSource {
    inner: Arc<dyn RaceDataSource>,
    cache: Mutex<TtlCache<RaceContext>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedRaceSource {
    pub fn new(inner: Arc<dyn RaceDataSource>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(TtlCache::new(ttl, max_entries)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn invalidate(&self, product_id: &str) {
        self.cache.lock().await.invalidate(product_id);
    }

    /// Cache hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

#[async_trait]
impl RaceDataSource for CachedRaceSource {
    async fn list_candidates(&self, date: NaiveDate) -> Result<Vec<RaceCandidate>, PlannerError> {
        self.inner.list_candidates(date).await
    }

    async fn race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        if let Some(race) = self.cache.lock().await.get(product_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(product_id, "Race context cache hit");
            return Ok(race);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Failures are not cached; the next call goes back to the provider.
        let race = self.inner.race_context(product_id).await?;
        self.cache
            .lock()
            .await
            .insert(product_id.to_string(), race.clone());
        Ok(race)
    }

    /// Goes straight to the provider and refreshes the cached entry.
    async fn fresh_race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        let fetched = self.inner.fresh_race_context(product_id).await;
        let mut cache = self.cache.lock().await;
        match fetched {
            Ok(race) => {
                cache.insert(product_id.to_string(), race.clone());
                Ok(race)
            }
            Err(e) => {
                cache.invalidate(product_id);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Bounded LRU cache of materialized result sets.
//!
//! One cache may be shared by several report contexts. Entries live in a
//! `moka` cache with the LRU eviction policy; snapshots are handed out as
//! `Arc`s and every caller gets its own cursor over them. Pending maintenance
//! is run after each write so capacity, eviction counts and the entry gauge
//! are exact when the call returns.

use std::future::Future;
use std::sync::{Arc, Mutex};

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

use crate::error::Result;
use crate::metrics::EngineMetrics;
use crate::result_set::{ResultSet, ResultSnapshot};

/// What a cached result set was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Datasource identity (credentials removed).
    pub datasource: String,
    pub query: String,
    /// Canonical serialization of the bound parameter values.
    pub params: String,
}

impl CacheKey {
    pub fn new(
        datasource: impl Into<String>,
        query: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self {
            datasource: datasource.into(),
            query: query.into(),
            params: params.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// Caching is disabled (capacity 0); the query ran and nothing was stored.
    Bypassed,
}

pub struct QueryCache {
    capacity: usize,
    entries: Cache<CacheKey, Arc<ResultSnapshot>>,
    /// Keys dropped for capacity, filled by the eviction listener.
    evicted: Arc<Mutex<Vec<CacheKey>>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    pub fn with_metrics(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self::build(capacity, Some(metrics))
    }

    fn build(capacity: usize, metrics: Option<Arc<EngineMetrics>>) -> Self {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let listener_evicted = Arc::clone(&evicted);
        let listener_metrics = metrics.clone();

        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                move |key: Arc<CacheKey>, _snapshot: Arc<ResultSnapshot>, cause: RemovalCause| {
                    if cause != RemovalCause::Size {
                        return;
                    }
                    debug!("Evicted cached result for query '{}'", key.query);
                    if let Some(m) = &listener_metrics {
                        m.cache_evictions.inc();
                    }
                    listener_evicted
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(key.as_ref().clone());
                },
            )
            .build();

        Self {
            capacity,
            entries,
            evicted,
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run pending maintenance and publish the entry count.
    fn settle(&self) -> usize {
        self.entries.run_pending_tasks();
        let len = self.entries.entry_count() as usize;
        if let Some(m) = &self.metrics {
            m.cache_entries.set(len as i64);
        }
        len
    }

    /// Cached snapshot for `key`, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ResultSnapshot>> {
        self.entries.get(key)
    }

    /// Store a snapshot. Returns the key evicted to make room, if any.
    pub fn insert(&self, key: CacheKey, snapshot: Arc<ResultSnapshot>) -> Option<CacheKey> {
        if self.capacity == 0 {
            return None;
        }
        // Reads recorded so far must reach the access order before this write.
        self.entries.run_pending_tasks();
        self.entries.insert(key, snapshot);
        self.settle();
        self.evicted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    /// Serve `key` from the cache, or run `exec` and cache what it produces.
    ///
    /// Concurrent misses on the same key may each execute; the last insert wins.
    pub async fn get_or_execute<F, Fut>(
        &self,
        key: CacheKey,
        exec: F,
    ) -> Result<(ResultSet, CacheOutcome)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResultSnapshot>>,
    {
        if self.capacity == 0 {
            let snapshot = exec().await?;
            return Ok((ResultSet::new(Arc::new(snapshot)), CacheOutcome::Bypassed));
        }

        if let Some(snapshot) = self.get(&key) {
            if let Some(m) = &self.metrics {
                m.cache_hits.inc();
            }
            return Ok((ResultSet::new(snapshot), CacheOutcome::Hit));
        }

        if let Some(m) = &self.metrics {
            m.cache_misses.inc();
        }
        let snapshot = Arc::new(exec().await?);
        self.insert(key, Arc::clone(&snapshot));
        Ok((ResultSet::new(snapshot), CacheOutcome::Miss))
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        self.settle();
        removed
    }

    pub fn clear(&self) {
        for (key, _) in self.entries.iter() {
            self.entries.invalidate(key.as_ref());
        }
        self.settle();
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_set::Schema;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snap(v: f64) -> ResultSnapshot {
        ResultSnapshot::new(Schema::new(vec!["v".to_string()]), vec![vec![Value::Number(v)]])
            .unwrap()
    }

    fn key(q: &str) -> CacheKey {
        CacheKey::new("ds", q, "")
    }

    #[tokio::test]
    async fn test_hit_skips_execution() {
        let cache = QueryCache::new(4);
        let calls = AtomicUsize::new(0);

        let (mut a, first) = cache
            .get_or_execute(key("q"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(snap(1.0))
            })
            .await
            .unwrap();
        let (b, second) = cache
            .get_or_execute(key("q"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(snap(2.0))
            })
            .await
            .unwrap();

        assert_eq!(first, CacheOutcome::Miss);
        assert_eq!(second, CacheOutcome::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(a.snapshot(), b.snapshot()));

        a.next();
        assert!(b.current().is_none());
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = QueryCache::new(2);
        assert_eq!(cache.insert(key("a"), Arc::new(snap(1.0))), None);
        assert_eq!(cache.insert(key("b"), Arc::new(snap(2.0))), None);
        // touch "a" so "b" becomes the LRU entry
        assert!(cache.get(&key("a")).is_some());
        assert_eq!(cache.insert(key("c"), Arc::new(snap(3.0))), Some(key("b")));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key("a")));
        assert!(cache.contains(&key("c")));
    }

    #[test]
    fn test_evictions_are_counted_once_each() {
        let metrics = Arc::new(EngineMetrics::new());
        let cache = QueryCache::with_metrics(2, Arc::clone(&metrics));
        for (i, q) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.insert(key(q), Arc::new(snap(i as f64)));
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(metrics.cache_evictions.get(), 2);
        assert_eq!(metrics.cache_entries.get(), 2);

        // replacing and removing are not evictions
        cache.insert(key("d"), Arc::new(snap(9.0)));
        cache.invalidate(&key("c"));
        assert_eq!(metrics.cache_evictions.get(), 2);
        assert_eq!(metrics.cache_entries.get(), 1);
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let cache = QueryCache::new(2);
        cache.insert(key("a"), Arc::new(snap(1.0)));
        cache.insert(key("a"), Arc::new(snap(2.0)));
        assert_eq!(cache.len(), 1);
        let got = cache.get(&key("a")).unwrap();
        assert_eq!(got.rows()[0][0], Value::Number(2.0));
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_caching() {
        let cache = QueryCache::new(0);
        for _ in 0..2 {
            let (_, outcome) = cache
                .get_or_execute(key("q"), || async { Ok(snap(1.0)) })
                .await
                .unwrap();
            assert_eq!(outcome, CacheOutcome::Bypassed);
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_is_not_cached() {
        let cache = QueryCache::new(2);
        let err = cache
            .get_or_execute(key("q"), || async {
                Err(crate::error::FolioError::InvalidParameters("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::FolioError::InvalidParameters(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let metrics = Arc::new(EngineMetrics::new());
        let cache = QueryCache::with_metrics(4, Arc::clone(&metrics));
        cache.insert(key("a"), Arc::new(snap(1.0)));
        cache.insert(key("b"), Arc::new(snap(2.0)));
        assert_eq!(metrics.cache_entries.get(), 2);

        assert!(cache.invalidate(&key("a")));
        assert!(!cache.invalidate(&key("a")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(metrics.cache_entries.get(), 0);
    }
}

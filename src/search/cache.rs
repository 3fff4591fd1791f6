use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::models::QueryResult;

/// (normalized query, n_results)
pub type CacheKey = (String, usize);

/// Bounded LRU of ranked results. A capacity of zero disables caching.
pub struct ResultCache {
    inner: Option<Mutex<LruCache<CacheKey, Vec<QueryResult>>>>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            capacity,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<QueryResult>> {
        self.inner.as_ref()?.lock().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, results: Vec<QueryResult>) {
        if let Some(inner) = &self.inner {
            inner.lock().put(key, results);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn results(tag: &str) -> Vec<QueryResult> {
        vec![QueryResult {
            document: tag.to_string(),
            metadata: Metadata::new(),
            distance: 0.1,
            raw_distance: 0.2,
            lexical_score: Some(0.5),
        }]
    }

    fn key(q: &str) -> CacheKey {
        (q.to_string(), 5)
    }

    #[test]
    fn test_hit_returns_stored_value() {
        let cache = ResultCache::new(4);
        cache.put(key("funnels"), results("a"));
        assert_eq!(cache.get(&key("funnels")), Some(results("a")));
        assert_eq!(cache.get(&("funnels".to_string(), 6)), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ResultCache::new(2);
        cache.put(key("a"), results("a"));
        cache.put(key("b"), results("b"));
        // Touch "a" so "b" becomes the eviction victim
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), results("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = ResultCache::new(0);
        cache.put(key("a"), results("a"));
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 0);
    }
}

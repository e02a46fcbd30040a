use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

use crate::utils::Metrics;

/// In-memory LRU of translated strings, keyed by language pair and text.
///
/// Lives for the process lifetime only; nothing is written to disk.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    cache: Mutex<LruCache<u64, String>>,
    metrics: Option<Metrics>,
}

impl TranslationCache {
    pub fn new(max_entries: usize, metrics: Option<Metrics>) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                cache: Mutex::new(LruCache::new(capacity)),
                metrics,
            }),
        }
    }

    /// xxHash3 over `source \0 target \0 text`
    pub fn generate_key(source: &str, target: &str, text: &str) -> u64 {
        let mut hash_input = Vec::with_capacity(source.len() + target.len() + text.len() + 2);
        hash_input.extend_from_slice(source.as_bytes());
        hash_input.push(0);
        hash_input.extend_from_slice(target.as_bytes());
        hash_input.push(0);
        hash_input.extend_from_slice(text.as_bytes());
        xxh3_64(&hash_input)
    }

    pub fn get(&self, key: u64) -> Option<String> {
        let hit = self.inner.cache.lock().get(&key).cloned();
        if let Some(ref m) = self.inner.metrics {
            if hit.is_some() {
                m.record_cache_hit();
            } else {
                m.record_cache_miss();
            }
        }
        hit
    }

    pub fn put(&self, key: u64, translation: String) {
        self.inner.cache.lock().put(key, translation);
    }

    pub fn len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_generation() {
        let key1 = TranslationCache::generate_key("en", "ar", "Hello");
        let key2 = TranslationCache::generate_key("en", "ar", "Hello");
        let key3 = TranslationCache::generate_key("en", "fr", "Hello");
        // Separator keeps ("ab","c") and ("a","bc") apart
        let key4 = TranslationCache::generate_key("en", "ar", "ab");
        let key5 = TranslationCache::generate_key("en", "a", "rab");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key4, key5);
    }

    #[test]
    fn test_cache_get_put_and_metrics() {
        let metrics = Metrics::new();
        let cache = TranslationCache::new(10, Some(metrics.clone()));
        let key = TranslationCache::generate_key("en", "ar", "Hello");

        assert!(cache.get(key).is_none());
        cache.put(key, "مرحبا".to_string());
        assert_eq!(cache.get(key).as_deref(), Some("مرحبا"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TranslationCache::new(2, None);
        cache.put(1, "one".to_string());
        cache.put(2, "two".to_string());
        assert!(cache.get(1).is_some());
        cache.put(3, "three".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
    }
}

//! In-memory LRU cache of remote translations with TTL.
//! Key: blake3 of (source_lang | target_lang | text sent to the provider).
//! Glossary substitutions are already part of the text, so reloads never
//! need to invalidate entries.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

pub type CacheKey = [u8; 32];

struct CacheEntry {
    translated_text: String,
    inserted_at: Instant,
}

pub struct TranslationCache {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl TranslationCache {
    /// A zero capacity is bumped to one entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn compute_key(source_lang: &str, target_lang: &str, text: &str) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(target_lang.as_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Cached translation, or None if absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Some(entry.translated_text.clone())
            }
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, translated_text: String) {
        self.inner.lock().put(
            key,
            CacheEntry {
                translated_text,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_languages() {
        let a = TranslationCache::compute_key("auto", "en", "你好");
        let b = TranslationCache::compute_key("auto", "ja", "你好");
        assert_ne!(a, b);
        assert_eq!(a, TranslationCache::compute_key("auto", "en", "你好"));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = TranslationCache::new(4, Duration::ZERO);
        let key = TranslationCache::compute_key("en", "zh", "hi");
        cache.insert(key, "嗨".into());
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_evicts_oldest() {
        let cache = TranslationCache::new(1, Duration::from_secs(60));
        let k1 = TranslationCache::compute_key("en", "zh", "one");
        let k2 = TranslationCache::compute_key("en", "zh", "two");
        cache.insert(k1, "一".into());
        cache.insert(k2, "二".into());
        assert_eq!(cache.get(&k1), None);
        assert_eq!(cache.get(&k2).as_deref(), Some("二"));
    }
}

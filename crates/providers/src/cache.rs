//! Process-wide embedding cache.
//!
//! Maps `hash(text)` → vector with LRU eviction. The hot path (repeat
//! messages, handler registration text) is a read-lock lookup; insertion
//! and eviction take the write lock. Lifetime = process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

struct CacheEntry {
    embedding: Vec<f32>,
    /// Logical clock stamp of the most recent access.
    last_used: AtomicU64,
}

/// Bounded LRU cache for embedding vectors.
pub struct EmbeddingCache {
    entries: RwLock<HashMap<u64, CacheEntry>>,
    clock: AtomicU64,
    capacity: usize,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Look up a cached vector by text. Refreshes recency on hit.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = hash_text(text);
        let entries = self.entries.read();
        entries.get(&key).map(|entry| {
            let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
            entry.last_used.store(stamp, Ordering::Relaxed);
            entry.embedding.clone()
        })
    }

    /// Insert a vector, evicting the least-recently-used entry on overflow.
    pub fn put(&self, text: &str, embedding: Vec<f32>) {
        let key = hash_text(text);
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                embedding,
                last_used: AtomicU64::new(stamp),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Hash a text to a u64 cache key.
fn hash_text(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves() {
        let cache = EmbeddingCache::new(8);
        cache.put("hello", vec![1.0, 2.0]);
        assert_eq!(cache.get("hello"), Some(vec![1.0, 2.0]));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);

        // Touch "a" so "b" becomes the LRU entry.
        let _ = cache.get("a");
        cache.put("c", vec![3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        cache.put("a", vec![9.0]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(vec![9.0]));
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn capacity_floor_is_one() {
        let cache = EmbeddingCache::new(0);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        assert_eq!(cache.len(), 1);
    }
}

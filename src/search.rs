// src/search.rs - Tag search with a bounded query cache
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Default number of cached queries besides the base entry
pub const CACHE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub cache_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { cache_size: CACHE_SIZE }
    }
}

/// Case-insensitive substring search over a fixed list of entries
///
/// The `""` query maps to every entry and is never evicted. Other queries are
/// cached in insertion order and the oldest is dropped once more than
/// `cache_size` are held. A query narrows the results of the longest cached
/// query it contains, so typing one more character only rescans the
/// previous matches.
///
/// # Examples
///
/// ```rust
/// use vigil::TagSearchCache;
///
/// let mut cache = TagSearchCache::new(vec!["A3".to_string(), "B12".to_string(), "a30".to_string()], 10);
/// assert_eq!(cache.search("a3"), vec!["A3".to_string(), "a30".to_string()]);
/// assert!(cache.is_cached("a3"));
/// ```
#[derive(Debug, Clone)]
pub struct TagSearchCache {
    cache: HashMap<String, Vec<String>>,
    eviction: VecDeque<String>,
    capacity: usize,
}

impl TagSearchCache {
    pub fn new(entries: Vec<String>, capacity: usize) -> Self {
        let mut cache = HashMap::new();
        cache.insert(String::new(), entries);
        Self {
            cache,
            eviction: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn with_config(entries: Vec<String>, config: &SearchConfig) -> Self {
        Self::new(entries, config.cache_size)
    }

    /// Entries containing `query`, in their original order
    pub fn search(&mut self, query: &str) -> Vec<String> {
        let key = query.to_lowercase();
        if let Some(hit) = self.cache.get(&key) {
            trace!("Tag search cache hit for '{}'", key);
            return hit.clone();
        }

        let narrowest = self
            .cache
            .iter()
            .filter(|(cached, _)| key.contains(cached.as_str()))
            .max_by_key(|(cached, _)| cached.len())
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or_default();
        let matches: Vec<String> = narrowest
            .iter()
            .filter(|entry| entry.to_lowercase().contains(&key))
            .cloned()
            .collect();

        self.cache.insert(key.clone(), matches.clone());
        self.eviction.push_back(key);
        while self.eviction.len() > self.capacity {
            if let Some(oldest) = self.eviction.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        matches
    }

    pub fn is_cached(&self, query: &str) -> bool {
        self.cache.contains_key(&query.to_lowercase())
    }

    /// Cached queries oldest first, excluding the base entry
    pub fn cached_queries(&self) -> impl Iterator<Item = &str> {
        self.eviction.iter().map(String::as_str)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

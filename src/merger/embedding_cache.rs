//! Bounded LRU cache of text embeddings.
//!
//! The merger embeds the same comparison text repeatedly across merge
//! rounds (and identical events recur across articles), so vectors are
//! cached by exact text. Reads refresh recency; inserts evict the least
//! recently used entry when full.

use std::sync::Mutex;

use indexmap::IndexMap;

/// Thread-safe LRU keyed by comparison text.
pub struct EmbeddingCache {
    inner: Mutex<IndexMap<String, Vec<f32>>>,
    capacity: usize,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(IndexMap::new()),
            capacity,
        }
    }

    /// Look up a vector, moving the entry to most-recently-used.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let mut map = self.inner.lock().unwrap();
        let index = map.get_index_of(text)?;
        // shift_remove + reinsert keeps insertion order as recency order.
        let (key, vector) = map.shift_remove_index(index)?;
        let result = vector.clone();
        map.insert(key, vector);
        Some(result)
    }

    pub fn insert(&self, text: String, vector: Vec<f32>) {
        let mut map = self.inner.lock().unwrap();
        if map.shift_remove(&text).is_none() && map.len() >= self.capacity {
            map.shift_remove_index(0);
        }
        map.insert(text, vector);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! In-memory embedding cache with LRU eviction and a time-to-live
//!
//! Entries live in a slab of nodes linked into a recency list (front = most recent)
//! and are found through a hash map of slab indices, so lookups, promotion and
//! eviction are all O(1). Expiry is measured from insertion.

use crate::config::EmbeddingCacheConfig;
use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fields of an embedding request that determine the vector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingKey {
    pub text: String,
    pub dimensions: Option<usize>,
    pub normalize: bool,
}

impl EmbeddingKey {
    pub fn new(text: impl Into<String>, dimensions: Option<usize>, normalize: bool) -> Self {
        Self {
            text: text.into(),
            dimensions,
            normalize,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Node {
    key: EmbeddingKey,
    vector: Arc<[f32]>,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: AHashMap<EmbeddingKey, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl Inner {
    fn node(&self, idx: usize) -> Option<&Node> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(node) = self.node_mut(h)
        {
            node.prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn remove(&mut self, idx: usize) -> Option<Node> {
        self.unlink(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some(node)
    }

    fn allocate(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }
}

/// Capacity-bounded LRU of embedding vectors with a TTL
#[derive(Debug)]
pub struct EmbeddingCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn from_config(config: &EmbeddingCacheConfig) -> Self {
        Self::new(config.capacity, config.ttl)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a vector; expired entries are reported as misses
    pub fn get(&self, key: &EmbeddingKey) -> Option<Arc<[f32]>> {
        self.get_at(key, Instant::now())
    }

    /// Store a vector, evicting expired entries and then least recently used ones
    pub fn set(&self, key: EmbeddingKey, vector: impl Into<Arc<[f32]>>) {
        self.set_at(key, vector.into(), Instant::now());
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            len: inner.index.len(),
            capacity: self.capacity,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.free.clear();
        inner.index.clear();
        inner.head = None;
        inner.tail = None;
    }

    fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(inserted_at) > self.ttl
    }

    fn get_at(&self, key: &EmbeddingKey, now: Instant) -> Option<Arc<[f32]>> {
        let mut inner = self.inner.lock();

        let Some(idx) = inner.index.get(key).copied() else {
            inner.misses += 1;
            return None;
        };

        let (inserted_at, vector) = match inner.node(idx) {
            Some(node) => (node.inserted_at, Arc::clone(&node.vector)),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if self.is_expired(inserted_at, now) {
            inner.misses += 1;
            return None;
        }

        inner.unlink(idx);
        inner.push_front(idx);
        inner.hits += 1;
        Some(vector)
    }

    fn set_at(&self, key: EmbeddingKey, vector: Arc<[f32]>, now: Instant) {
        let mut inner = self.inner.lock();

        self.purge_expired(&mut inner, now);

        if let Some(idx) = inner.index.get(&key).copied() {
            if let Some(node) = inner.node_mut(idx) {
                node.vector = vector;
                node.inserted_at = now;
            }
            inner.unlink(idx);
            inner.push_front(idx);
            return;
        }

        if self.capacity == 0 {
            return;
        }

        while inner.index.len() >= self.capacity {
            let Some(tail) = inner.tail else {
                break;
            };
            inner.remove(tail);
            inner.evictions += 1;
        }

        let idx = inner.allocate(Node {
            key: key.clone(),
            vector,
            inserted_at: now,
            prev: None,
            next: None,
        });
        inner.index.insert(key, idx);
        inner.push_front(idx);
    }

    fn purge_expired(&self, inner: &mut Inner, now: Instant) {
        let expired: Vec<usize> = inner
            .index
            .values()
            .copied()
            .filter(|&idx| inner.node(idx).is_some_and(|n| self.is_expired(n.inserted_at, now)))
            .collect();

        for idx in expired {
            inner.remove(idx);
            inner.expirations += 1;
        }
    }
}

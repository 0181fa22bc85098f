//! Bounded GET response cache

use lru::LruCache;
use std::num::NonZeroUsize;

use trishul_common::HttpResponse;

pub const DEFAULT_MAX_ENTRIES: usize = 256;
pub const DEFAULT_MAX_BYTES: usize = 32 * 1024 * 1024;

/// Least-recently-used cache keyed by URL. Holds at most `max_entries`
/// responses and at most `max_bytes` of response bodies; the oldest entries
/// are evicted first.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Option<LruCache<String, HttpResponse>>,
    max_bytes: usize,
    bytes: usize,
}

impl ResponseCache {
    /// A zero `max_entries` disables caching.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(max_entries).map(LruCache::new),
            max_bytes,
            bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total body bytes currently held.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn get(&mut self, key: &str) -> Option<HttpResponse> {
        self.entries.as_mut()?.get(key).cloned()
    }

    /// Responses larger than the whole byte budget are not kept.
    pub fn insert(&mut self, key: String, response: HttpResponse) {
        let size = response.body.len();
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        if size > self.max_bytes {
            return;
        }
        if let Some(old) = entries.pop(&key) {
            self.bytes -= old.body.len();
        }
        while self.bytes + size > self.max_bytes {
            match entries.pop_lru() {
                Some((_, old)) => self.bytes -= old.body.len(),
                None => break,
            }
        }
        if let Some((_, evicted)) = entries.push(key, response) {
            self.bytes -= evicted.body.len();
        }
        self.bytes += size;
    }

    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.bytes = 0;
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_BYTES)
    }
}

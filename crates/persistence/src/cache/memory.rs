//! Bounded in-memory image tier

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cached image with its recency stamp
struct CacheEntry {
    bytes: Arc<[u8]>,
    last_access: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.bytes.len();
        Some(entry)
    }

    /// Evict the least recently used entry
    fn evict_oldest(&mut self) -> bool {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());

        match oldest_key {
            Some(key) => self.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Thread-safe image cache bounded by entry count and aggregate byte size.
/// Overflow evicts least recently used entries first.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
}

impl MemoryImageCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
                clock: 0,
            }),
            max_entries,
            max_bytes,
        }
    }

    /// Get an image and mark it as recently used
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let mut inner = self.inner.lock().ok()?;
        let now = inner.tick();
        let entry = inner.entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.bytes.clone())
    }

    /// Insert or replace an image. Payloads larger than the byte budget are
    /// not cached at all.
    pub fn insert(&self, key: &str, bytes: Arc<[u8]>) {
        if self.max_entries == 0 || bytes.len() > self.max_bytes {
            return;
        }

        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(key);

            while inner.entries.len() >= self.max_entries
                || inner.total_bytes + bytes.len() > self.max_bytes
            {
                if !inner.evict_oldest() {
                    break;
                }
            }

            let now = inner.tick();
            inner.total_bytes += bytes.len();
            inner.entries.insert(
                key.to_string(),
                CacheEntry {
                    bytes,
                    last_access: now,
                },
            );
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(key);
        }
    }

    /// Clear entire cache
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.total_bytes = 0;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Get current cache size
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate size of cached payloads
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().map(|i| i.total_bytes).unwrap_or(0)
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        // 100 logos, 50 MiB
        Self::new(100, 50 * 1024 * 1024)
    }
}

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;

use aperture_types::prelude::now_ms;

use crate::errors::CacheError;
use crate::key::CacheKey;
use crate::stats::{CacheStats, SimpleStats};

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    bytes: Bytes,
    stored_at_ms: i64,
    ttl_ms: Option<i64>,
    access_count: u64,
}

impl Entry {
    fn is_fresh(&self, now: i64) -> bool {
        match self.ttl_ms {
            Some(ttl) => now < self.stored_at_ms + ttl,
            None => true,
        }
    }
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    bytes: usize,
}

/// Keyed store with per-entry TTL, bounded by entry count and total byte
/// size. Expired entries are dropped lazily on access; `sweep` clears them
/// eagerly. Count overflow evicts the entry with the fewest accesses (oldest
/// first on ties); byte overflow evicts ~10% of the lowest-scored entries
/// per pass.
pub struct TtlCache {
    inner: RwLock<Inner>,
    stats: SimpleStats,
    config: CacheConfig,
}

impl TtlCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            stats: SimpleStats::default(),
            config,
        }
    }

    pub fn get_bytes(&self, key: &CacheKey) -> Option<Bytes> {
        let now = now_ms();
        let mut inner = self.inner.write();
        let fresh = inner.map.get(&key.0).map(|entry| entry.is_fresh(now));
        match fresh {
            Some(true) => {
                if let Some(entry) = inner.map.get_mut(&key.0) {
                    entry.access_count += 1;
                    self.stats.record_hit();
                    return Some(entry.bytes.clone());
                }
                self.stats.record_miss();
                None
            }
            Some(false) => {
                if let Some(stale) = inner.map.remove(&key.0) {
                    inner.bytes = inner.bytes.saturating_sub(stale.bytes.len());
                }
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub fn get<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let bytes = self.get_bytes(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                self.stats.record_error();
                tracing::debug!(target: "aperture::cache", key = %key, "decode failed: {err}");
                None
            }
        }
    }

    pub fn set<T>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: serde::Serialize,
    {
        let encoded = serde_json::to_vec(value)
            .map_err(|err| CacheError::codec(&format!("encode failed: {err}")))?;
        self.set_bytes(key, Bytes::from(encoded), ttl);
        Ok(())
    }

    pub fn set_bytes(&self, key: &CacheKey, bytes: Bytes, ttl: Option<Duration>) {
        let entry = Entry {
            stored_at_ms: now_ms(),
            ttl_ms: ttl.map(|d| d.as_millis() as i64),
            access_count: 0,
            bytes,
        };

        let mut inner = self.inner.write();
        if let Some(previous) = inner.map.remove(&key.0) {
            inner.bytes = inner.bytes.saturating_sub(previous.bytes.len());
        }
        inner.bytes += entry.bytes.len();
        inner.map.insert(key.0.clone(), entry);

        while inner.map.len() > self.config.max_entries {
            if !self.evict_lowest(&mut inner, 1) {
                break;
            }
        }
        while inner.bytes > self.config.max_bytes && !inner.map.is_empty() {
            let batch = (inner.map.len() / 10).max(1);
            if !self.evict_lowest(&mut inner, batch) {
                break;
            }
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.map.remove(&key.0) {
            inner.bytes = inner.bytes.saturating_sub(entry.bytes.len());
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.bytes = 0;
        self.stats.reset();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = now_ms();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = inner.map.remove(key) {
                inner.bytes = inner.bytes.saturating_sub(entry.bytes.len());
            }
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            entries: inner.map.len(),
            size_bytes: inner.bytes,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
        }
    }

    /// Evict up to `count` entries with the lowest (access_count, stored_at)
    /// score. Returns false when nothing could be evicted.
    fn evict_lowest(&self, inner: &mut Inner, count: usize) -> bool {
        let mut scored: Vec<(String, u64, i64)> = inner
            .map
            .iter()
            .map(|(key, entry)| (key.clone(), entry.access_count, entry.stored_at_ms))
            .collect();
        if scored.is_empty() {
            return false;
        }
        scored.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));
        let mut evicted = false;
        for (key, _, _) in scored.into_iter().take(count) {
            if let Some(entry) = inner.map.remove(&key) {
                inner.bytes = inner.bytes.saturating_sub(entry.bytes.len());
                self.stats.record_eviction();
                evicted = true;
            }
        }
        evicted
    }
}

//! Per-query TTL cache for metric results

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::types::MetricResult;

/// A cached metric result and its expiry deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: MetricResult,
    pub expires_at: Instant,
}

/// Thread-safe TTL cache keyed by canonical query keys.
///
/// Expiration is checked on read; expired entries are invisible to `get` and
/// reaped lazily by `purge_expired`.
#[derive(Debug, Default)]
pub struct MetricCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `result` under `key` for `ttl`. The latest set wins.
    pub fn set(&self, key: impl Into<String>, result: MetricResult, ttl: Duration) {
        let entry = CacheEntry {
            result,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().unwrap().insert(key.into(), entry);
    }

    /// Fetch a live entry; `None` if absent or past its TTL.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .filter(|e| Instant::now() < e.expires_at)
            .cloned()
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    /// Number of entries, counting expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

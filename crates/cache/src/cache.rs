//! Memoized tool output.

use crate::{OutputOptimizer, Payload, fingerprint};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cache and optimizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, nothing is stored but output is still optimized.
    pub enabled: bool,
    /// Maximum number of entries; the oldest entry is evicted first.
    pub capacity: usize,
    /// Entry lifetime in seconds. `0` keeps entries until evicted.
    pub ttl_secs: u64,
    /// Output larger than this is truncated. `0` disables truncation.
    pub max_output_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            ttl_secs: 600,
            max_output_bytes: 16 * 1024,
        }
    }
}

/// A cached (possibly reduced) tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Payload,
    pub original_size: usize,
    pub stored_size: usize,
    pub created_at: DateTime<Utc>,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes_saved: u64,
    pub tokens_saved: u64,
}

/// Rough bytes-per-token ratio for the saved-tokens estimate.
const BYTES_PER_TOKEN: u64 = 4;

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    bytes_saved: u64,
}

struct Slot {
    seq: u64,
    entry: Arc<CacheEntry>,
}

/// Output cache keyed by [`fingerprint`].
///
/// Entries are written once per key: a second `store` for a live key
/// returns the existing entry instead of replacing it.
pub struct OutputCache {
    config: CacheConfig,
    optimizer: OutputOptimizer,
    ttl: Option<TimeDelta>,
    inner: Mutex<Inner>,
}

impl OutputCache {
    pub fn new(config: CacheConfig) -> Self {
        let ttl = match config.ttl_secs {
            0 => None,
            secs => i64::try_from(secs).ok().and_then(TimeDelta::try_seconds),
        };
        Self {
            optimizer: OutputOptimizer::new(config.max_output_bytes),
            config,
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.capacity > 0
    }

    /// Look up a previous result for this call.
    pub fn lookup(&self, tool: &str, args: &Value) -> Option<Arc<CacheEntry>> {
        self.lookup_at(tool, args, Utc::now())
    }

    fn lookup_at(&self, tool: &str, args: &Value, now: DateTime<Utc>) -> Option<Arc<CacheEntry>> {
        if !self.is_enabled() {
            return None;
        }
        let key = fingerprint(tool, args);
        let mut inner = self.lock();

        let expired = inner
            .entries
            .get(&key)
            .map(|slot| self.is_expired(&slot.entry, now));
        let live = match expired {
            Some(false) => inner.entries.get(&key).map(|slot| slot.entry.clone()),
            Some(true) => {
                inner.entries.remove(&key);
                None
            }
            None => None,
        };

        match live {
            Some(entry) => {
                inner.hits += 1;
                Some(entry)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Optimize `raw` and store it under this call's fingerprint.
    ///
    /// Returns the entry that is now cached, which is an earlier writer's
    /// entry if one is still live. With the cache disabled the optimized
    /// entry is returned without being stored.
    pub fn store(&self, tool: &str, args: &Value, raw: Payload) -> Arc<CacheEntry> {
        self.store_at(tool, args, raw, Utc::now())
    }

    fn store_at(
        &self,
        tool: &str,
        args: &Value,
        raw: Payload,
        now: DateTime<Utc>,
    ) -> Arc<CacheEntry> {
        let key = fingerprint(tool, args);
        let reduced = self.optimizer.reduce(raw);
        let saved = reduced.bytes_saved() as u64;
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            payload: reduced.payload,
            original_size: reduced.original_size,
            stored_size: reduced.stored_size,
            created_at: now,
        });

        let mut inner = self.lock();
        if !self.is_enabled() {
            inner.bytes_saved += saved;
            return entry;
        }

        if let Some(slot) = inner.entries.get(&key) {
            if !self.is_expired(&slot.entry, now) {
                return slot.entry.clone();
            }
        }

        inner.entries.retain(|_, slot| !self.is_expired(&slot.entry, now));
        while inner.entries.len() >= self.config.capacity {
            let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.seq)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            inner.entries.remove(&oldest);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.bytes_saved += saved;
        inner.entries.insert(
            key,
            Slot {
                seq,
                entry: entry.clone(),
            },
        );
        entry
    }

    /// Run the optimizer on output that is not cached.
    pub fn optimize(&self, raw: Payload) -> Payload {
        let reduced = self.optimizer.reduce(raw);
        self.lock().bytes_saved += reduced.bytes_saved() as u64;
        reduced.payload
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            bytes_saved: inner.bytes_saved,
            tokens_saved: inner.bytes_saved / BYTES_PER_TOKEN,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - entry.created_at >= ttl)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for OutputCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

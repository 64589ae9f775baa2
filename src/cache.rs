//! Provider response cache with expiry.
//!
//! Entries live in memory and are mirrored as one JSON document in a
//! [`KeyValueStore`], so a fresh process starts warm. Expiry is measured
//! against an injected [`Clock`].

use crate::clock::Clock;
use crate::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Bump when the entry layout changes; older snapshots are discarded on load
const CACHE_VERSION: u32 = 1;

pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: serde_json::Value,
    /// Unix timestamp (milliseconds)
    timestamp: i64,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: u32,
    entries: &'a HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub storage_key: String,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

pub struct ResponseCache {
    config: CacheConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    /// Open the cache, pruning expired or malformed persisted entries.
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let cache = Self {
            config,
            store,
            clock,
            entries: Mutex::new(HashMap::new()),
        };
        cache.load();
        cache
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.config.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn is_expired(&self, entry: &CacheEntry, now_ms: i64) -> bool {
        now_ms.saturating_sub(entry.timestamp) > self.ttl_millis()
    }

    fn load(&self) {
        let Some(raw) = self.store.get(&self.config.storage_key) else {
            return;
        };

        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %self.config.storage_key, error = %e, "discarding unreadable cache");
                let _ = self.store.remove(&self.config.storage_key);
                return;
            }
        };

        if parsed.get("version").and_then(|v| v.as_u64()) != Some(CACHE_VERSION as u64) {
            debug!(key = %self.config.storage_key, "cache version changed, starting empty");
            let _ = self.store.remove(&self.config.storage_key);
            return;
        }

        let now_ms = self.clock.millis_since_epoch();
        let stored = parsed
            .get("entries")
            .and_then(|e| e.as_object())
            .cloned()
            .unwrap_or_default();
        let stored_len = stored.len();

        let mut kept: Vec<(String, CacheEntry)> = stored
            .into_iter()
            .filter_map(|(key, value)| {
                serde_json::from_value::<CacheEntry>(value)
                    .ok()
                    .map(|entry| (key, entry))
            })
            .filter(|(_, entry)| !self.is_expired(entry, now_ms))
            .collect();
        kept.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
        kept.truncate(self.config.max_entries);

        let changed = kept.len() != stored_len;
        let mut entries = self.lock();
        entries.extend(kept);
        if changed {
            self.persist(&entries);
        }
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) {
        let snapshot = Snapshot {
            version: CACHE_VERSION,
            entries,
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.store.set(&self.config.storage_key, &json));
        if let Err(e) = result {
            warn!(key = %self.config.storage_key, error = %e, "failed to persist cache");
        }
    }

    /// Cached value for `key`, if present, fresh, and of the expected shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now_ms = self.clock.millis_since_epoch();
        let mut entries = self.lock();
        let entry = entries.get(key)?;

        if self.is_expired(entry, now_ms) {
            entries.remove(key);
            self.persist(&entries);
            return None;
        }

        match serde_json::from_value(entry.data.clone()) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "dropping cache entry with unexpected shape");
                entries.remove(key);
                self.persist(&entries);
                None
            }
        }
    }

    /// Store `value`, evicting the oldest entries beyond the size limit.
    pub fn insert<T: Serialize>(&self, key: &str, value: &T) {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "value not cacheable");
                return;
            }
        };

        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                timestamp: self.clock.millis_since_epoch(),
            },
        );

        if entries.len() > self.config.max_entries {
            let mut by_age: Vec<(String, i64)> =
                entries.iter().map(|(k, e)| (k.clone(), e.timestamp)).collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let overflow = entries.len() - self.config.max_entries;
            for (old_key, _) in by_age.into_iter().take(overflow) {
                entries.remove(&old_key);
            }
        }

        self.persist(&entries);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.persist(&entries);
    }
}

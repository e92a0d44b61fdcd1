//! Cache Store Module
//!
//! Main cache engine: keyed entries with expiry, a byte ceiling enforced by
//! oldest-first eviction, and a mirror of every entry in a storage backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{AgeIndex, CacheEntry, Codec, StorageBackend, StorageStats};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{CacheError, Result};

const VERSION_SUFFIX: &str = "__version";
/// Entry records live under `namespace + ENTRY_PREFIX`, apart from the marker.
const ENTRY_PREFIX: &str = "e:";

// == Store Options ==
/// Parameters the store is opened with.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub namespace: String,
    pub version: String,
    pub capacity_bytes: u64,
    pub compression_threshold: usize,
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            version: config.cache_version.clone(),
            capacity_bytes: config.capacity_bytes,
            compression_threshold: config.compression_threshold,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

// == Key Pattern ==
/// Invalidation pattern.
///
/// A pattern containing `*` or `?` is a glob over the whole key (`*` matches any
/// run of characters, `?` exactly one). Anything else matches as a substring.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Substring(String),
    Glob(Regex),
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.contains(['*', '?']) {
            return Ok(KeyPattern::Substring(pattern.to_string()));
        }

        let mut source = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');

        Regex::new(&source)
            .map(KeyPattern::Glob)
            .map_err(|e| CacheError::InvalidRequest(e.to_string()))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Substring(needle) => key.contains(needle.as_str()),
            KeyPattern::Glob(re) => re.is_match(key),
        }
    }
}

// == Cache Store ==
/// Size-bounded key/value store with lazy expiry.
#[derive(Debug)]
pub struct CacheStore {
    /// Live entries by key
    entries: HashMap<String, CacheEntry>,
    /// Creation-time order for eviction
    ages: AgeIndex,
    /// Running sum of entry sizes
    total_size: u64,
    capacity: u64,
    codec: Codec,
    namespace: String,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    /// Keys whose last fetch or refresh failed
    error_prone: HashSet<String>,
    evictions: u64,
}

impl CacheStore {
    // == Constructor ==
    /// Opens the store over `backend`.
    ///
    /// A missing or different version marker clears the whole namespace.
    /// Otherwise entries are loaded back, dropping malformed and expired records.
    pub fn open(
        options: StoreOptions,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut store = Self {
            entries: HashMap::new(),
            ages: AgeIndex::new(),
            total_size: 0,
            capacity: options.capacity_bytes,
            codec: Codec::new(options.compression_threshold),
            namespace: options.namespace,
            backend,
            clock,
            error_prone: HashSet::new(),
            evictions: 0,
        };

        let version_key = store.version_key();
        match store.backend.get_item(&version_key) {
            Some(found) if found == options.version => store.rehydrate(),
            found => {
                if let Some(found) = found {
                    warn!(
                        "Cache version changed from {} to {}, clearing namespace",
                        found, options.version
                    );
                }
                store.clear_backend();
                store.backend.set_item(&version_key, &options.version)?;
            }
        }

        Ok(store)
    }

    fn version_key(&self) -> String {
        format!("{}{}", self.namespace, VERSION_SUFFIX)
    }

    fn entry_prefix(&self) -> String {
        format!("{}{}", self.namespace, ENTRY_PREFIX)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.entry_prefix(), key)
    }

    fn rehydrate(&mut self) {
        let prefix = self.entry_prefix();
        let now = self.clock.now_ms();
        let mut dropped = 0;

        for storage_key in self.backend.keys() {
            let Some(key) = storage_key.strip_prefix(&prefix) else {
                continue;
            };
            let record = self
                .backend
                .get_item(&storage_key)
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok());

            match record {
                Some(entry)
                    if entry.key == key
                        && !entry.is_expired(now)
                        && entry.expires_at > entry.created_at =>
                {
                    self.ages.insert(&entry.key, entry.created_at);
                    self.total_size += entry.size();
                    self.entries.insert(entry.key.clone(), entry);
                }
                _ => {
                    self.backend.remove_item(&storage_key);
                    dropped += 1;
                }
            }
        }

        let evicted = self.evict_to(self.capacity);
        info!(
            "Cache store loaded {} entries ({} dropped, {} evicted)",
            self.entries.len(),
            dropped,
            evicted
        );
    }

    /// Removes every entry record of this namespace. The version marker and
    /// other namespaces are left alone.
    fn clear_backend(&self) {
        let prefix = self.entry_prefix();
        for storage_key in self.backend.keys() {
            if storage_key.starts_with(&prefix) {
                self.backend.remove_item(&storage_key);
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key` until `expires_at` (Unix milliseconds).
    ///
    /// Replaces any existing entry for the key. If the new entry does not fit,
    /// the oldest entries are evicted until it does.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, expires_at: u64) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }

        let now = self.clock.now_ms();
        if expires_at <= now {
            return Err(CacheError::InvalidRequest(format!(
                "Expiry for '{}' must be later than the current time",
                key
            )));
        }

        let encoded = self.codec.compress(value)?;
        self.insert_entry(CacheEntry::new(key, encoded, now, expires_at))
    }

    fn insert_entry(&mut self, entry: CacheEntry) -> Result<()> {
        let size = entry.size();
        if size > self.capacity {
            return Err(CacheError::StorageQuota(format!(
                "Entry '{}' is {} bytes, capacity is {} bytes",
                entry.key, size, self.capacity
            )));
        }

        let record = serde_json::to_string(&entry).map_err(|e| CacheError::Encoding(e.to_string()))?;

        // Replacement frees the old entry's bytes before anything is evicted
        self.remove_entry(&entry.key);

        while self.total_size + size > self.capacity {
            match self.evict_oldest() {
                Some(oldest) => debug!("Evicted '{}' to make room for '{}'", oldest, entry.key),
                None => break,
            }
        }

        self.backend.set_item(&self.storage_key(&entry.key), &record)?;
        self.ages.insert(&entry.key, entry.created_at);
        self.total_size += size;
        self.error_prone.remove(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    // == Get ==
    /// Returns the live entry for `key`.
    ///
    /// An expired entry is deleted and reported as absent.
    pub fn get_entry(&mut self, key: &str) -> Option<&CacheEntry> {
        let now = self.clock.now_ms();
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            debug!("Entry '{}' expired, removing", key);
            self.remove_entry(key);
            return None;
        }
        self.entries.get(key)
    }

    /// Returns the decoded value for `key`.
    ///
    /// An entry that fails to decode is deleted and treated as a miss.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let codec = self.codec;
        let decoded = self
            .get_entry(key)
            .map(|entry| codec.decompress::<T>(&entry.payload))?;

        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping corrupt entry '{}': {}", key, e);
                self.remove_entry(key);
                None
            }
        }
    }

    /// Expiry of the live entry for `key`.
    pub fn expires_at(&mut self, key: &str) -> Option<u64> {
        self.get_entry(key).map(|entry| entry.expires_at)
    }

    // == Delete ==
    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_size -= entry.size();
                self.ages.remove(key);
                self.backend.remove_item(&self.storage_key(key));
                true
            }
            None => false,
        }
    }

    /// Removes a single key. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    // == Invalidate ==
    /// Removes every key matching `pattern`, or everything when no pattern is given.
    ///
    /// See [`KeyPattern`] for matching rules. Returns the number removed.
    pub fn invalidate(&mut self, pattern: Option<&str>) -> Result<usize> {
        let removed = match pattern.filter(|p| !p.is_empty()) {
            None => {
                let count = self.entries.len();
                self.entries.clear();
                self.ages.clear();
                self.total_size = 0;
                self.error_prone.clear();
                self.clear_backend();
                count
            }
            Some(pattern) => {
                let matcher = KeyPattern::parse(pattern)?;
                let keys: Vec<String> = self
                    .entries
                    .keys()
                    .filter(|key| matcher.matches(key))
                    .cloned()
                    .collect();
                keys.iter().filter(|key| self.remove_entry(key)).count()
            }
        };

        info!("Invalidated {} entries (pattern: {:?})", removed, pattern);
        Ok(removed)
    }

    // == Evict ==
    /// Evicts oldest entries until the total size is at most `target_bytes`.
    pub fn evict_to(&mut self, target_bytes: u64) -> usize {
        let mut evicted = 0;
        while self.total_size > target_bytes && self.evict_oldest().is_some() {
            evicted += 1;
        }
        evicted
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self.ages.pop_oldest()?;
        self.remove_entry(&oldest);
        self.evictions += 1;
        Some(oldest)
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
        }
        expired_keys.len()
    }

    // == Error-Prone Keys ==
    /// Marks `key` as having failed its last fetch. Cleared by the next successful write.
    pub fn flag_error_prone(&mut self, key: &str) {
        self.error_prone.insert(key.to_string());
    }

    pub fn error_prone_count(&self) -> usize {
        self.error_prone.len()
    }

    /// Removes the entries of every flagged key and clears the flags.
    pub fn invalidate_error_prone(&mut self) -> usize {
        let flagged: Vec<String> = self.error_prone.drain().collect();
        flagged.iter().filter(|key| self.remove_entry(key)).count()
    }

    /// Removes compressed entries whose own ratio is above `threshold`.
    pub fn invalidate_poorly_compressed(&mut self, threshold: f64) -> usize {
        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.payload.is_compressed() && entry.compression_ratio() > threshold)
            .map(|entry| entry.key.clone())
            .collect();
        keys.iter().filter(|key| self.remove_entry(key)).count()
    }

    // == Stats ==
    /// Recomputes storage statistics from the current entries.
    pub fn stats(&self) -> StorageStats {
        StorageStats::from_entries(self.entries.values())
    }

    /// Running size total, kept equal to `stats().total_compressed_size`.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

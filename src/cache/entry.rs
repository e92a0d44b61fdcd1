//! Cache Entry Module
//!
//! Defines the record stored for each key, including its expiry window.

use serde::{Deserialize, Serialize};

use crate::cache::codec::{compression_ratio, Blob, Encoded};

// == Cache Entry ==
/// Represents a single cache entry with payload and metadata.
///
/// Entries are replaced whole; nothing mutates an entry in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Key without the storage namespace
    pub key: String,
    /// Compressed serialization of the value
    pub payload: Blob,
    /// Serialized size before compression
    pub original_size: u64,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry written at `now` and valid until `expires_at`.
    pub fn new(key: impl Into<String>, encoded: Encoded, now: u64, expires_at: u64) -> Self {
        Self {
            key: key.into(),
            payload: encoded.blob,
            original_size: encoded.original_size,
            created_at: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once `now >= expires_at`, so a
    /// read exactly at the expiry instant is already a miss.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    // == Time To Live ==
    /// Remaining lifetime in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// Bytes this entry counts against the store capacity.
    pub fn size(&self) -> u64 {
        self.payload.stored_size()
    }

    /// Stored size over original size for this entry.
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.size(), self.original_size)
    }
}

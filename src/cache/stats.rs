//! Storage Statistics Module
//!
//! Size and compression figures derived from the entries currently stored.

use serde::Serialize;

use crate::cache::codec::compression_ratio;
use crate::cache::CacheEntry;

// == Storage Stats ==
/// Snapshot of what the store holds. Always recomputed, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Sum of stored (compressed) entry sizes in bytes
    pub total_compressed_size: u64,
    /// Sum of serialized sizes before compression
    pub total_original_size: u64,
    /// Number of entries
    pub item_count: usize,
    /// total_compressed_size / total_original_size, 1.0 when empty
    pub compression_ratio: f64,
}

impl StorageStats {
    // == Constructor ==
    /// Computes stats over a set of entries.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.total_compressed_size += entry.size();
            stats.total_original_size += entry.original_size;
            stats.item_count += 1;
        }
        stats.compression_ratio =
            compression_ratio(stats.total_compressed_size, stats.total_original_size);
        stats
    }

    // == Usage ==
    /// Fraction of `capacity` in use, 0.0 for a zero capacity.
    pub fn usage(&self, capacity: u64) -> f64 {
        if capacity == 0 {
            0.0
        } else {
            self.total_compressed_size as f64 / capacity as f64
        }
    }
}

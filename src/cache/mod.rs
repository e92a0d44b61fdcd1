//! Cache Module
//!
//! Size-bounded response storage with expiry, compression and a persistent mirror.

mod age;
mod codec;
mod entry;
mod stats;
mod storage;
mod store;


// Re-export public types
pub use age::AgeIndex;
pub use codec::{compression_ratio, Blob, Codec, Encoded};
pub use entry::CacheEntry;
pub use stats::StorageStats;
pub use storage::{MemoryStorage, StorageBackend};
pub use store::{CacheStore, KeyPattern, StoreOptions};

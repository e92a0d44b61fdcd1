//! Storage Backend Module
//!
//! String key/value persistence the cache store mirrors its entries into.

use std::fmt::Debug;

use dashmap::DashMap;

use crate::error::Result;

/// Session-scoped string storage, shaped like a browser's local storage.
pub trait StorageBackend: Send + Sync + Debug {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

// == Memory Storage ==
/// In-process storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.items.iter().map(|item| item.key().clone()).collect()
    }
}

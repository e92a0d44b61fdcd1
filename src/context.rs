//! Shared Cache Context
//!
//! Owns the session-wide store and monitor and hands them to every executor,
//! scheduler and maintenance rule.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::{CacheStore, MemoryStorage, StorageBackend, StoreOptions};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::monitor::{Health, Monitor};

/// Handle to the shared cache state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheContext {
    /// Thread-safe cache store
    pub store: Arc<RwLock<CacheStore>>,
    /// Session-wide request counters
    pub monitor: Arc<Monitor>,
    pub clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl CacheContext {
    /// Opens the store over `backend` and creates a fresh monitor.
    pub fn new(config: Config, backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = CacheStore::open(StoreOptions::from(&config), backend, clock.clone())?;
        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            monitor: Arc::new(Monitor::new()),
            clock,
            config: Arc::new(config),
        })
    }

    /// Context backed by process memory and the system clock.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.clone(),
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock::new()),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Current health snapshot.
    pub async fn health(&self) -> Health {
        let store = self.store.read().await;
        self.monitor.health(&store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_contexts_do_not_share_state() {
        let clock = Arc::new(ManualClock::new(0));
        let a = CacheContext::new(Config::default(), Arc::new(MemoryStorage::new()), clock.clone()).unwrap();
        let b = CacheContext::new(Config::default(), Arc::new(MemoryStorage::new()), clock).unwrap();

        a.monitor.record_hit();
        a.store.write().await.set("k", &1, 10).unwrap();

        assert_eq!(b.monitor.metrics().total_requests, 0);
        assert_eq!(b.health().await.item_count, 0);
        assert_eq!(a.health().await.item_count, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let ctx = CacheContext::from_config(&Config::default()).unwrap();
        let clone = ctx.clone();
        clone.monitor.record_miss();
        assert_eq!(ctx.monitor.metrics().misses, 1);
    }
}

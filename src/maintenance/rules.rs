//! Maintenance Rules
//!
//! Rule descriptors, the handler trait they are evaluated through, and the
//! built-in rules that keep storage, error rate and compression in check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::context::CacheContext;

// == Maintenance Config ==
/// Thresholds and timer periods for the built-in rules.
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceConfig {
    /// Usage fraction of store capacity above which storage is reclaimed
    pub storage_threshold: f64,
    /// Usage fraction the storage rule evicts down to
    pub storage_target: f64,
    pub error_rate_threshold: f64,
    /// Overall compression ratio above which compression is considered poor
    pub compression_threshold: f64,
    pub storage_interval: Duration,
    pub error_rate_interval: Duration,
    pub compression_interval: Duration,
    /// Events kept in the displayed history window
    pub history_limit: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            storage_threshold: 0.8,
            storage_target: 0.6,
            error_rate_threshold: 0.05,
            compression_threshold: 0.7,
            storage_interval: Duration::from_secs(5 * 60),
            error_rate_interval: Duration::from_secs(60),
            compression_interval: Duration::from_secs(30 * 60),
            history_limit: 50,
        }
    }
}

impl MaintenanceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_limit: config.maintenance_history_limit,
            ..Self::default()
        }
    }
}

// == Rule Descriptor ==
/// Serializable description of a registered rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRule {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Human readable summary of what the action does
    pub action: String,
    pub interval_ms: u64,
    pub enabled: bool,
}

impl MaintenanceRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, interval: Duration) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            action: String::new(),
            interval_ms: interval.as_millis() as u64,
            enabled: true,
        }
    }

    pub fn describe(mut self, description: impl Into<String>, action: impl Into<String>) -> Self {
        self.description = description.into();
        self.action = action.into();
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// == Rule Handler ==
/// Condition and action of one rule, evaluated against the shared context.
#[async_trait]
pub trait RuleHandler: Send + Sync {
    /// Whether the action should run now.
    async fn condition(&self, ctx: &CacheContext) -> anyhow::Result<bool>;

    /// Performs the action, returning details for the event log.
    async fn action(&self, ctx: &CacheContext) -> anyhow::Result<String>;
}

// == Storage Limit ==
/// Reclaims space once the store passes a usage fraction of its capacity.
#[derive(Debug, Clone, Copy)]
pub struct StorageLimitRule {
    pub threshold: f64,
    pub target: f64,
}

#[async_trait]
impl RuleHandler for StorageLimitRule {
    async fn condition(&self, ctx: &CacheContext) -> anyhow::Result<bool> {
        let store = ctx.store.read().await;
        let usage = store.stats().usage(store.capacity());
        debug!(usage, threshold = self.threshold, "Checked storage usage");
        Ok(usage > self.threshold)
    }

    async fn action(&self, ctx: &CacheContext) -> anyhow::Result<String> {
        let mut store = ctx.store.write().await;
        let expired = store.cleanup_expired();
        let target = (store.capacity() as f64 * self.target) as u64;
        let evicted = store.evict_to(target);
        Ok(format!(
            "Removed {} expired and evicted {} oldest entries, usage now {:.1}%",
            expired,
            evicted,
            store.stats().usage(store.capacity()) * 100.0
        ))
    }
}

// == Error Rate ==
/// Drops entries of keys whose last fetch failed once errors climb.
#[derive(Debug, Clone, Copy)]
pub struct ErrorRateRule {
    pub threshold: f64,
}

#[async_trait]
impl RuleHandler for ErrorRateRule {
    async fn condition(&self, ctx: &CacheContext) -> anyhow::Result<bool> {
        Ok(ctx.monitor.metrics().error_rate() > self.threshold)
    }

    async fn action(&self, ctx: &CacheContext) -> anyhow::Result<String> {
        let removed = ctx.store.write().await.invalidate_error_prone();
        Ok(format!("Invalidated {} error-prone entries", removed))
    }
}

// == Compression ==
/// Invalidates compressed entries that barely shrank.
#[derive(Debug, Clone, Copy)]
pub struct CompressionRule {
    pub threshold: f64,
}

#[async_trait]
impl RuleHandler for CompressionRule {
    async fn condition(&self, ctx: &CacheContext) -> anyhow::Result<bool> {
        let stats = ctx.store.read().await.stats();
        Ok(stats.item_count > 0 && stats.compression_ratio > self.threshold)
    }

    async fn action(&self, ctx: &CacheContext) -> anyhow::Result<String> {
        let removed = ctx
            .store
            .write()
            .await
            .invalidate_poorly_compressed(self.threshold);
        Ok(format!(
            "Invalidated {} entries compressing worse than {:.0}%",
            removed,
            self.threshold * 100.0
        ))
    }
}

/// The built-in rule catalog, enabled by default.
pub fn builtin_rules(config: &MaintenanceConfig) -> Vec<(MaintenanceRule, Arc<dyn RuleHandler>)> {
    vec![
        (
            MaintenanceRule::new("storage-limit", "Storage Limit", config.storage_interval).describe(
                format!(
                    "Storage usage above {:.0}% of capacity",
                    config.storage_threshold * 100.0
                ),
                "Evict oldest entries",
            ),
            Arc::new(StorageLimitRule {
                threshold: config.storage_threshold,
                target: config.storage_target,
            }),
        ),
        (
            MaintenanceRule::new("error-rate", "Error Rate", config.error_rate_interval).describe(
                format!(
                    "Request error rate above {:.0}%",
                    config.error_rate_threshold * 100.0
                ),
                "Invalidate error-prone entries",
            ),
            Arc::new(ErrorRateRule {
                threshold: config.error_rate_threshold,
            }),
        ),
        (
            MaintenanceRule::new("compression", "Compression", config.compression_interval).describe(
                format!(
                    "Compression ratio above {:.0}%",
                    config.compression_threshold * 100.0
                ),
                "Invalidate poorly compressed entries",
            ),
            Arc::new(CompressionRule {
                threshold: config.compression_threshold,
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::clock::ManualClock;

    const NOW: u64 = 1_000_000;

    fn context(capacity_bytes: u64) -> CacheContext {
        let config = Config {
            capacity_bytes,
            ..Config::default()
        };
        CacheContext::new(config, Arc::new(MemoryStorage::new()), Arc::new(ManualClock::new(NOW))).unwrap()
    }

    /// A string value whose stored JSON form is exactly `bytes` long.
    fn sized(bytes: usize) -> String {
        "x".repeat(bytes - 2)
    }

    #[test]
    fn test_builtin_catalog() {
        let rules = builtin_rules(&MaintenanceConfig::default());
        let ids: Vec<&str> = rules.iter().map(|(rule, _)| rule.id.as_str()).collect();
        assert_eq!(ids, vec!["storage-limit", "error-rate", "compression"]);
        assert!(rules.iter().all(|(rule, _)| rule.enabled));
        assert_eq!(rules[1].0.interval(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_storage_rule_evicts_to_target() {
        let ctx = context(100);
        {
            let mut store = ctx.store.write().await;
            for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
                store.set(key, &sized(20), NOW + 1000 + i as u64).unwrap();
            }
        }
        let rule = StorageLimitRule {
            threshold: 0.7,
            target: 0.5,
        };

        assert!(rule.condition(&ctx).await.unwrap());
        let details = rule.action(&ctx).await.unwrap();

        let mut store = ctx.store.write().await;
        assert!(store.total_size() <= 50);
        assert!(!store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.get::<String>("d").is_some());
        assert!(details.contains("evicted 2"));
    }

    #[tokio::test]
    async fn test_storage_rule_quiet_below_threshold() {
        let ctx = context(1000);
        ctx.store.write().await.set("a", &sized(100), NOW + 10).unwrap();
        let rule = StorageLimitRule {
            threshold: 0.8,
            target: 0.6,
        };
        assert!(!rule.condition(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_error_rate_rule() {
        let ctx = context(10_000);
        {
            let mut store = ctx.store.write().await;
            store.set("flaky", &1, NOW + 10).unwrap();
            store.set("stable", &2, NOW + 10).unwrap();
            store.flag_error_prone("flaky");
        }
        let rule = ErrorRateRule { threshold: 0.05 };

        ctx.monitor.record_hit();
        assert!(!rule.condition(&ctx).await.unwrap());
        ctx.monitor.record_error();
        assert!(rule.condition(&ctx).await.unwrap());

        assert_eq!(rule.action(&ctx).await.unwrap(), "Invalidated 1 error-prone entries");
        let store = ctx.store.read().await;
        assert!(!store.contains("flaky"));
        assert!(store.contains("stable"));
        assert_eq!(store.error_prone_count(), 0);
    }

    #[tokio::test]
    async fn test_compression_rule_needs_entries() {
        let ctx = context(10_000);
        let rule = CompressionRule { threshold: 0.7 };
        assert!(!rule.condition(&ctx).await.unwrap());

        ctx.store.write().await.set("small", &1, NOW + 10).unwrap();
        assert!(rule.condition(&ctx).await.unwrap(), "Raw entries have ratio 1.0");
        rule.action(&ctx).await.unwrap();
        assert!(ctx.store.read().await.contains("small"), "Raw entries are never invalidated");
    }
}

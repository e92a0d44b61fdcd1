//! Response DTOs for the cache API
//!
//! Rates are kept as 0..1 fractions everywhere else; these types are where
//! they get formatted for display.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::StorageStats;
use crate::maintenance::{MaintenanceEvent, MaintenanceSummary};
use crate::monitor::{Health, Metrics};

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "healthy", or "degraded" while the error rate is above its threshold
    pub status: String,
    pub hit_rate: String,
    pub error_rate: String,
    /// Bytes stored as a share of the display quota
    pub storage_usage: String,
    pub storage_used_bytes: u64,
    pub storage_quota_bytes: u64,
    pub item_count: usize,
    pub compression_ratio: String,
    pub timestamp: String,
}

impl HealthResponse {
    /// `now_ms` is the cache clock's reading, stamped as RFC 3339.
    pub fn new(health: &Health, quota_bytes: u64, error_threshold: f64, now_ms: u64) -> Self {
        let usage = if quota_bytes == 0 {
            0.0
        } else {
            health.storage_usage as f64 / quota_bytes as f64
        };
        Self {
            status: if health.error_rate > error_threshold {
                "degraded".to_string()
            } else {
                "healthy".to_string()
            },
            hit_rate: percent(health.hit_rate),
            error_rate: percent(health.error_rate),
            storage_usage: percent(usage),
            storage_used_bytes: health.storage_usage,
            storage_quota_bytes: quota_bytes,
            item_count: health.item_count,
            compression_ratio: percent(health.compression_ratio),
            timestamp: DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
                .unwrap_or_else(Utc::now)
                .to_rfc3339(),
        }
    }
}

/// Response body for `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: Metrics,
    pub hit_rate: f64,
    pub error_rate: f64,
}

impl From<Metrics> for MetricsResponse {
    fn from(metrics: Metrics) -> Self {
        Self {
            hit_rate: metrics.hit_rate(),
            error_rate: metrics.error_rate(),
            metrics,
        }
    }
}

/// Response body for `GET /stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub storage: StorageStats,
    pub capacity_bytes: u64,
    /// Fraction of the store capacity in use
    pub usage: f64,
    pub evictions: u64,
    pub error_prone_keys: usize,
    pub refresh_tasks: Vec<String>,
}

/// Response body for `DELETE /cache`.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub message: String,
    pub removed: usize,
}

impl InvalidateResponse {
    pub fn new(pattern: Option<&str>, removed: usize) -> Self {
        let message = match pattern {
            Some(pattern) => format!("Invalidated {} entries matching '{}'", removed, pattern),
            None => format!("Cleared cache ({} entries)", removed),
        };
        Self { message, removed }
    }
}

/// Response body for the maintenance run and event feed endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub events: Vec<MaintenanceEvent>,
    pub summary: MaintenanceSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(error_rate: f64) -> Health {
        Health {
            hit_rate: 0.75,
            error_rate,
            storage_usage: 512,
            item_count: 3,
            compression_ratio: 1.0,
        }
    }

    #[test]
    fn test_health_response_formats_percentages() {
        let resp = HealthResponse::new(&health(0.0), 1024, 0.05, 0);
        assert_eq!(resp.status, "healthy");
        assert_eq!(resp.hit_rate, "75.0%");
        assert_eq!(resp.storage_usage, "50.0%");
        assert_eq!(resp.compression_ratio, "100.0%");

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["itemCount"], 3);
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_health_response_degraded() {
        let resp = HealthResponse::new(&health(0.1), 1024, 0.05, 0);
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.error_rate, "10.0%");
    }

    #[test]
    fn test_health_timestamp_follows_given_time() {
        let resp = HealthResponse::new(&health(0.0), 1024, 0.05, 1_700_000_000_123);
        assert_eq!(resp.timestamp, "2023-11-14T22:13:20.123+00:00");
    }

    #[test]
    fn test_metrics_response_flattens() {
        let metrics = Metrics {
            hits: 3,
            misses: 1,
            errors: 0,
            total_requests: 4,
        };
        let json = serde_json::to_value(MetricsResponse::from(metrics)).unwrap();
        assert_eq!(json["hits"], 3);
        assert_eq!(json["totalRequests"], 4);
        assert_eq!(json["hitRate"], 0.75);
    }

    #[test]
    fn test_invalidate_response_message() {
        assert!(InvalidateResponse::new(Some("user:*"), 2).message.contains("user:*"));
        assert!(InvalidateResponse::new(None, 5).message.starts_with("Cleared"));
    }
}

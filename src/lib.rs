//! Portal Cache - read-through response cache with self-maintenance
//!
//! Compressed, size-bounded storage with lazy expiry, a retrying query
//! executor, per-key background refresh and a rule-based maintenance loop.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod monitor;
pub mod query;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use context::CacheContext;
pub use error::{CacheError, Result};
pub use maintenance::{MaintenanceConfig, MaintenanceEngine};
pub use query::{QueryExecutor, QueryOptions, RetryConfig};
pub use tasks::{RefreshOptions, RefreshScheduler};

//! Query Module
//!
//! Read-through execution of caller-supplied producers with retry and backoff.

mod executor;
mod retry;

pub use executor::{QueryExecutor, QueryOptions};
pub use retry::{retry_with_backoff, RetryConfig, RetryState};

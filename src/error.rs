//! Error types for the portal cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// Cloneable so a single failed fetch can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Value could not be serialized or compressed
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Stored blob is malformed or decompressed to nothing
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// Eviction cannot free enough space for the entry
    #[error("Storage quota exceeded: {0}")]
    StorageQuota(String),

    /// Caller-supplied producer failed
    #[error("Producer failed for '{key}': {cause}")]
    Producer {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// Background refresh failure, only ever delivered to an `on_error` callback
    #[error("Refresh of '{key}' failed (attempt {attempts}): {message}")]
    Scheduling {
        key: String,
        attempts: u32,
        message: String,
    },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown resource (rule id, key)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a producer failure for `key`.
    pub fn producer(key: impl Into<String>, err: anyhow::Error) -> Self {
        CacheError::Producer {
            key: key.into(),
            cause: Arc::new(err),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::StorageQuota(_) => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::Producer { .. } | CacheError::Scheduling { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Encoding(_) | CacheError::Decoding(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;

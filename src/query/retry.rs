//! Retry Policy Module
//!
//! Exponential backoff for producer calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CacheError, Result};

// == Retry Config ==
/// How often and how patiently a failing producer is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt` (0-based):
    /// `min(max_delay, initial_delay * backoff_factor^attempt)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let scaled = (initial_ms * self.backoff_factor.powi(attempt as i32)).round();
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis((scaled as u64).min(max_ms))
    }
}

// == Retry State ==
/// Progress of one retry sequence. Lives only for a single call.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempt: u32,
    next_delay: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries taken so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Registers a failure. Returns whether another attempt is allowed; the
    /// wait before it is then available from `next_delay`.
    pub fn on_failure(&mut self, config: &RetryConfig) -> bool {
        if self.attempt >= config.max_retries {
            self.next_delay = None;
            return false;
        }
        self.next_delay = Some(config.delay_for(self.attempt));
        self.attempt += 1;
        true
    }
}

/// Calls `producer` until it succeeds or the retry budget runs out.
///
/// Intermediate failures are only logged; the last one is returned.
pub async fn retry_with_backoff<T, F, Fut>(key: &str, producer: &F, config: &RetryConfig) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut state = RetryState::new();
    loop {
        match producer().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !state.on_failure(config) {
                    return Err(CacheError::producer(key, err));
                }
                let delay = state.next_delay().unwrap_or(config.initial_delay);
                warn!(
                    key,
                    attempt = state.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Producer failed, retrying: {:#}",
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

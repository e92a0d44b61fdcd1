//! Cacheable Query Executor
//!
//! Read-through access: serve fresh cached data, otherwise run the producer
//! with retries and write the result through to the store.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::query::retry::{retry_with_backoff, RetryConfig};

type FetchOutput = Result<Arc<dyn Any + Send + Sync>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutput>>;
type InFlight = Arc<Mutex<HashMap<String, SharedFetch>>>;

// == Query Options ==
/// Per-call cache duration and retry policy.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub cache_duration: Duration,
    pub retry: RetryConfig,
}

impl QueryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_duration: config.default_cache_duration,
            retry: config.retry,
        }
    }

    pub fn with_cache_duration(mut self, cache_duration: Duration) -> Self {
        self.cache_duration = cache_duration;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// == Query Executor ==
/// Cache-or-fetch executor shared by all callers of a session.
///
/// Concurrent calls for the same key share one producer chain: the first
/// caller's producer runs, later callers wait for its result. Metrics are
/// recorded once per chain.
#[derive(Clone)]
pub struct QueryExecutor {
    ctx: CacheContext,
    in_flight: InFlight,
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(ctx: CacheContext) -> Self {
        Self {
            ctx,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of keys with a producer chain currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // == Execute ==
    /// Returns the cached value for `key` if fresh, otherwise fetches it.
    pub async fn execute<T, F, Fut>(&self, key: &str, producer: F, options: &QueryOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let cached = self.ctx.store.write().await.get::<T>(key);
        if let Some(value) = cached {
            self.ctx.monitor.record_hit();
            debug!("Cache hit for '{}'", key);
            return Ok(value);
        }

        debug!("Cache miss for '{}'", key);
        self.fetch(key, producer, options).await
    }

    // == Refetch ==
    /// Skips the cache lookup and always goes through the producer path.
    pub async fn refetch<T, F, Fut>(&self, key: &str, producer: F, options: &QueryOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fetch(key, producer, options).await
    }

    async fn fetch<T, F, Fut>(&self, key: &str, producer: F, options: &QueryOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(key) {
                Some(existing) => {
                    debug!("Joining in-flight fetch for '{}'", key);
                    existing.clone()
                }
                None => {
                    let chain = run_chain(
                        self.ctx.clone(),
                        self.in_flight.clone(),
                        key.to_string(),
                        producer,
                        options.clone(),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_string(), chain.clone());
                    chain
                }
            }
        };

        let value = shared.await?;
        value.downcast_ref::<T>().cloned().ok_or_else(|| {
            CacheError::Internal(format!(
                "In-flight fetch for '{}' produced a different type",
                key
            ))
        })
    }
}

/// One producer chain: retries, write-through and metrics.
async fn run_chain<T, F, Fut>(
    ctx: CacheContext,
    in_flight: InFlight,
    key: String,
    producer: F,
    options: QueryOptions,
) -> FetchOutput
where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let outcome = retry_with_backoff(&key, &producer, &options.retry).await;

    let result = match outcome {
        Ok(value) => {
            let expires_at = ctx.now_ms() + options.cache_duration.as_millis() as u64;
            if let Err(e) = ctx.store.write().await.set(&key, &value, expires_at) {
                warn!("Fetched '{}' but could not cache it: {}", key, e);
            }
            ctx.monitor.record_miss();
            info!("Fetched and cached '{}'", key);
            Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
        }
        Err(e) => {
            ctx.store.write().await.flag_error_prone(&key);
            ctx.monitor.record_error();
            error!("Giving up on '{}': {}", key, e);
            Err(e)
        }
    };

    in_flight
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&key);
    result
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::clock::SystemClock;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn context() -> CacheContext {
        CacheContext::new(
            Config::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock::new()),
        )
        .unwrap()
    }

    fn options() -> QueryOptions {
        QueryOptions::default()
            .with_cache_duration(Duration::from_secs(60))
            .with_retry(RetryConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(10_000),
                backoff_factor: 2.0,
            })
    }

    /// Producer that fails `failures` times, then returns the call number.
    fn flaky(calls: Arc<AtomicU32>, failures: u32) -> impl Fn() -> BoxFuture<'static, anyhow::Result<u32>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures {
                    Err(anyhow::anyhow!("attempt {} failed", n))
                } else {
                    Ok(n)
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_skips_producer() {
        let ctx = context();
        let expires = ctx.now_ms() + 1000;
        ctx.store.write().await.set("k", &json!({"a": 1}), expires).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let executor = QueryExecutor::new(ctx.clone());
        let producer_calls = calls.clone();
        let value: Value = executor
            .execute(
                "k",
                move || {
                    producer_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!({"a": 2})) }
                },
                &options(),
            )
            .await
            .unwrap();

        assert_eq!(value, json!({"a": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.monitor.metrics().hits, 1);
        assert_eq!(ctx.monitor.metrics().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_fetches_and_writes_through() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let first = executor.execute("k", flaky(calls.clone(), 0), &options()).await.unwrap();
        let second = executor.execute("k", flaky(calls.clone(), 0), &options()).await.unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 0, "Second call is served from cache");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = ctx.monitor.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 1);

        let expires = ctx.store.write().await.expires_at("k").unwrap();
        assert_eq!(expires, ctx.now_ms() + 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds_after_backoff() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let start = Instant::now();
        let value = executor.execute("k", flaky(calls.clone(), 2), &options()).await.unwrap();

        assert_eq!(value, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(100 + 200));
        assert_eq!(ctx.store.write().await.get::<u32>("k"), Some(2));
        assert_eq!(ctx.monitor.metrics().errors, 0);
        assert_eq!(ctx.monitor.metrics().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_records_one_error() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let start = Instant::now();
        let err = executor
            .execute("k", flaky(calls.clone(), u32::MAX), &options())
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Producer { .. }));
        assert!(err.to_string().contains("attempt 3 failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(100 + 200 + 400));

        let metrics = ctx.monitor.metrics();
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(ctx.store.read().await.error_prone_count(), 1);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_bypasses_cache() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));

        executor.execute("k", flaky(calls.clone(), 0), &options()).await.unwrap();
        let refreshed = executor.refetch("k", flaky(calls.clone(), 0), &options()).await.unwrap();

        assert_eq!(refreshed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.store.write().await.get::<u32>("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetched() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let short = options().with_cache_duration(Duration::from_millis(500));

        executor.execute("k", flaky(calls.clone(), 0), &short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let value = executor.execute("k", flaky(calls.clone(), 0), &short).await.unwrap();

        assert_eq!(value, 1);
        assert_eq!(ctx.monitor.metrics().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_fetch() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let slow = |calls: Arc<AtomicU32>| {
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("course list"))
                }
            }
        };

        let opts = options();
        let (a, b) = tokio::join!(
            executor.execute("courses", slow(calls.clone()), &opts),
            executor.execute("courses", slow(calls.clone()), &opts),
        );

        assert_eq!(a.unwrap(), json!("course list"));
        assert_eq!(b.unwrap(), json!("course list"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.monitor.metrics().misses, 1);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_fetch_independently() {
        let ctx = context();
        let executor = QueryExecutor::new(ctx.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let opts = options();
        let (a, b) = tokio::join!(
            executor.execute("a", flaky(calls.clone(), 0), &opts),
            executor.execute("b", flaky(calls.clone(), 0), &opts),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.store.read().await.len(), 2);
    }
}

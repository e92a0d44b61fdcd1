//! Background Refresh Task
//!
//! Keeps hot keys warm by re-running their producer ahead of expiry.
//!
//! Each key owns one task loop. A cycle either skips (caller predicate or a
//! still-valid entry), or fetches and writes through. Failures back off
//! geometrically and are reported through `on_error`, never thrown.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::CacheContext;
use crate::error::CacheError;

/// Decides from the last successful refresh time whether to refresh at all.
pub type ShouldRefresh = Arc<dyn Fn(Option<u64>) -> bool + Send + Sync>;
/// Receives background refresh failures.
pub type ErrorCallback = Arc<dyn Fn(&CacheError) + Send + Sync>;

// == Refresh Options ==
#[derive(Clone)]
pub struct RefreshOptions {
    /// Normal period between refreshes, also the written entry's lifetime
    pub interval: Duration,
    /// Floor for backoff delays
    pub min_interval: Duration,
    /// Ceiling for backoff delays and for waits on a still-valid entry
    pub max_interval: Duration,
    pub should_refresh: Option<ShouldRefresh>,
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for RefreshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshOptions")
            .field("interval", &self.interval)
            .field("min_interval", &self.min_interval)
            .field("max_interval", &self.max_interval)
            .field("should_refresh", &self.should_refresh.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl RefreshOptions {
    /// Refresh every `interval`, backing off from 1s up to eight intervals.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            min_interval: Duration::from_secs(1).min(interval),
            max_interval: interval.saturating_mul(8),
            should_refresh: None,
            on_error: None,
        }
    }

    pub fn with_bounds(mut self, min_interval: Duration, max_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self.max_interval = max_interval.max(min_interval);
        self
    }

    pub fn with_should_refresh(mut self, predicate: impl Fn(Option<u64>) -> bool + Send + Sync + 'static) -> Self {
        self.should_refresh = Some(Arc::new(predicate));
        self
    }

    pub fn with_on_error(mut self, callback: impl Fn(&CacheError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// `clamp(interval * 2^(attempts-1), min_interval, max_interval)`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.interval
            .saturating_mul(factor)
            .max(self.min_interval)
            .min(self.max_interval)
    }
}

// == Refresh Task ==
/// Observable state of one key's refresh loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTask {
    pub key: String,
    /// Unix milliseconds of the last successful refresh
    pub last_update: Option<u64>,
    /// Consecutive failures since the last success
    pub attempts: u32,
}

impl RefreshTask {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            last_update: None,
            attempts: 0,
        }
    }
}

type TaskState = Arc<Mutex<RefreshTask>>;

struct TaskHandle {
    state: TaskState,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    fn cancel(self) {
        let _ = self.shutdown.send(true);
    }
}

// == Refresh Scheduler ==
/// Owns at most one refresh loop per key.
pub struct RefreshScheduler {
    ctx: CacheContext,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("keys", &self.active_keys())
            .finish()
    }
}

impl RefreshScheduler {
    pub fn new(ctx: CacheContext) -> Self {
        Self {
            ctx,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    // == Start ==
    /// Starts refreshing `key`, replacing any loop already running for it.
    ///
    /// The first cycle runs immediately. Must be called within a tokio runtime.
    pub fn start<T, F, Fut>(&self, key: &str, producer: F, options: RefreshOptions)
    where
        T: Serialize + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut tasks = self.tasks();
        if let Some(previous) = tasks.remove(key) {
            debug!("Replacing refresh task for '{}'", key);
            previous.cancel();
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(RefreshTask::new(key)));
        let join = tokio::spawn(refresh_loop(
            self.ctx.clone(),
            key.to_string(),
            producer,
            options,
            state.clone(),
            shutdown_rx,
        ));

        tasks.insert(
            key.to_string(),
            TaskHandle {
                state,
                shutdown,
                join,
            },
        );
    }

    // == Stop ==
    /// Cancels the loop for `key`. Returns whether one was registered.
    ///
    /// A producer call already running is left to finish; its result is dropped.
    pub fn stop(&self, key: &str) -> bool {
        match self.tasks().remove(key) {
            Some(handle) => {
                handle.cancel();
                info!("Stopped background refresh for '{}'", key);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<(String, TaskHandle)> = self.tasks().drain().collect();
        for (_, handle) in drained {
            handle.cancel();
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.tasks()
            .get(key)
            .map(|handle| !handle.join.is_finished())
            .unwrap_or(false)
    }

    /// Snapshot of the loop state for `key`.
    pub fn task(&self, key: &str) -> Option<RefreshTask> {
        self.tasks()
            .get(key)
            .map(|handle| handle.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tasks().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn refresh_loop<T, F, Fut>(
    ctx: CacheContext,
    key: String,
    producer: F,
    options: RefreshOptions,
    state: TaskState,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    info!(
        "Starting background refresh for '{}' every {:?}",
        key, options.interval
    );

    loop {
        let Some(delay) = run_cycle(&ctx, &key, &producer, &options, &state, &shutdown).await else {
            debug!("Refresh for '{}' cancelled mid-cycle, result discarded", key);
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        if is_cancelled(&shutdown) {
            break;
        }
    }
}

/// Runs one cycle and returns the wait before the next, or `None` when the
/// task was cancelled while its producer ran.
async fn run_cycle<T, F, Fut>(
    ctx: &CacheContext,
    key: &str,
    producer: &F,
    options: &RefreshOptions,
    state: &TaskState,
    shutdown: &watch::Receiver<bool>,
) -> Option<Duration>
where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    if let Some(should_refresh) = &options.should_refresh {
        let last_update = state.lock().unwrap_or_else(|e| e.into_inner()).last_update;
        if !should_refresh(last_update) {
            debug!("Refresh of '{}' not needed, skipping", key);
            return Some(options.interval);
        }
    }

    let expires_at = ctx.store.write().await.expires_at(key);
    if let Some(expires_at) = expires_at {
        let remaining = Duration::from_millis(expires_at.saturating_sub(ctx.now_ms()).max(1));
        let next_check = remaining.min(options.max_interval);
        debug!("'{}' still valid, next check in {:?}", key, next_check);
        return Some(next_check);
    }

    let fetched = producer().await;

    let written = {
        let mut store = ctx.store.write().await;
        if is_cancelled(shutdown) {
            return None;
        }
        match fetched {
            Ok(value) => {
                let expires_at = ctx.now_ms() + options.interval.as_millis() as u64;
                store.set(key, &value, expires_at)
            }
            Err(e) => Err(CacheError::producer(key, e)),
        }
    };

    match written {
        Ok(()) => {
            let mut task = state.lock().unwrap_or_else(|e| e.into_inner());
            task.attempts = 0;
            task.last_update = Some(ctx.now_ms());
            debug!("Refreshed '{}'", key);
            Some(options.interval)
        }
        Err(err) => {
            let attempts = {
                let mut task = state.lock().unwrap_or_else(|e| e.into_inner());
                task.attempts += 1;
                task.attempts
            };
            let delay = options.backoff_delay(attempts);

            ctx.monitor.record_error();
            ctx.store.write().await.flag_error_prone(key);

            let err = CacheError::Scheduling {
                key: key.to_string(),
                attempts,
                message: err.to_string(),
            };
            warn!("{}; retrying in {:?}", err, delay);
            if let Some(on_error) = &options.on_error {
                on_error(&err);
            }
            Some(delay)
        }
    }
}

//! API Handlers
//!
//! HTTP request handlers for the health, metrics, invalidation and
//! maintenance endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::config::Config;
use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::maintenance::{MaintenanceConfig, MaintenanceEngine, MaintenanceRule};
use crate::models::{
    EventsParams, EventsResponse, HealthResponse, InvalidateParams, InvalidateResponse,
    MetricsResponse, StatsResponse,
};
use crate::query::QueryExecutor;
use crate::tasks::RefreshScheduler;

/// Application state shared across all handlers.
///
/// Every component shares the one `CacheContext`, so the executor, the
/// refresh scheduler and the maintenance rules see the same store and counters.
#[derive(Debug, Clone)]
pub struct AppState {
    pub ctx: CacheContext,
    pub executor: Arc<QueryExecutor>,
    pub scheduler: Arc<RefreshScheduler>,
    pub maintenance: Arc<MaintenanceEngine>,
    /// Error rate above which health reports "degraded"
    pub error_threshold: f64,
}

impl AppState {
    /// Wires the components around an existing context.
    pub fn new(ctx: CacheContext, maintenance: &MaintenanceConfig) -> Self {
        Self {
            executor: Arc::new(QueryExecutor::new(ctx.clone())),
            scheduler: Arc::new(RefreshScheduler::new(ctx.clone())),
            maintenance: Arc::new(MaintenanceEngine::with_builtin_rules(ctx.clone(), maintenance)),
            error_threshold: maintenance.error_rate_threshold,
            ctx,
        }
    }

    /// Creates the state from configuration with in-memory storage.
    pub fn from_config(config: &Config) -> Result<Self> {
        let ctx = CacheContext::from_config(config)?;
        Ok(Self::new(ctx, &MaintenanceConfig::from_config(config)))
    }

    /// Stops rule timers and every refresh loop.
    pub fn shutdown(&self) {
        self.maintenance.stop();
        self.scheduler.stop_all();
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.ctx.health().await;
    Json(HealthResponse::new(
        &health,
        state.ctx.config().storage_quota_bytes,
        state.error_threshold,
        state.ctx.now_ms(),
    ))
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.ctx.monitor.metrics().into())
}

/// Handler for POST /metrics/reset
///
/// Zeroes the counters. Cached entries are kept.
pub async fn reset_metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    state.ctx.monitor.reset();
    Json(state.ctx.monitor.metrics().into())
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let store = state.ctx.store.read().await;
    let storage = store.stats();

    Json(StatsResponse {
        storage,
        capacity_bytes: store.capacity(),
        usage: storage.usage(store.capacity()),
        evictions: store.evictions(),
        error_prone_keys: store.error_prone_count(),
        refresh_tasks: state.scheduler.active_keys(),
    })
}

/// Handler for DELETE /cache?pattern=
///
/// Removes entries matching the pattern, or everything without one.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = params.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let pattern = params.pattern();
    let removed = state.ctx.store.write().await.invalidate(pattern)?;

    Ok(Json(InvalidateResponse::new(pattern, removed)))
}

/// Handler for GET /maintenance/rules
pub async fn rules_handler(State(state): State<AppState>) -> Json<Vec<MaintenanceRule>> {
    Json(state.maintenance.rules())
}

/// Handler for POST /maintenance/rules/:id/toggle
pub async fn toggle_rule_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MaintenanceRule>> {
    Ok(Json(state.maintenance.toggle_rule(&id)?))
}

/// Handler for POST /maintenance/run
///
/// Evaluates every enabled rule now and returns the events it produced.
pub async fn run_maintenance_handler(State(state): State<AppState>) -> Json<EventsResponse> {
    let events = state.maintenance.run_manual().await;
    Json(EventsResponse {
        events,
        summary: state.maintenance.summary(),
    })
}

/// Handler for GET /maintenance/events?limit=N
pub async fn events_handler(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventsResponse>> {
    if let Some(error_msg) = params.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    Ok(Json(EventsResponse {
        events: state.maintenance.events(params.limit()),
        summary: state.maintenance.summary(),
    }))
}

//! API Routes
//!
//! Configures the Axum router with all cache endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    events_handler, health_handler, invalidate_handler, metrics_handler, reset_metrics_handler,
    rules_handler, run_maintenance_handler, stats_handler, toggle_rule_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Formatted health snapshot
/// - `GET /metrics`, `POST /metrics/reset` - Request counters
/// - `GET /stats` - Storage statistics
/// - `DELETE /cache?pattern=` - Invalidate by pattern, or everything
/// - `GET /maintenance/rules`, `POST /maintenance/rules/:id/toggle`
/// - `POST /maintenance/run` - Evaluate enabled rules now
/// - `GET /maintenance/events?limit=N` - Newest-first event feed
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/reset", post(reset_metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/cache", delete(invalidate_handler))
        .route("/maintenance/rules", get(rules_handler))
        .route("/maintenance/rules/:id/toggle", post(toggle_rule_handler))
        .route("/maintenance/run", post(run_maintenance_handler))
        .route("/maintenance/events", get(events_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

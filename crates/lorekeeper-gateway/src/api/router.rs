//! API Router configuration

use super::handlers;
use super::state::AppState;
use super::ws;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Ingestion
        .route("/lore/analyze", post(handlers::analyze_lore))
        .route("/lore/escalate", post(handlers::escalate_lore))
        // History
        .route("/conflicts", get(handlers::list_conflicts))
        .route("/conflicts/stats", get(handlers::conflict_stats))
        .route("/conflicts/:id", get(handlers::get_conflict))
        .route("/conflicts/:id/resolve", post(handlers::resolve_conflict))
        // Escalation
        .route("/escalation/stats", get(handlers::escalation_stats));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(ws::ws_handler))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/sessions/start", post(handlers::start_session))
        .route("/sessions/:guild_id/stop", post(handlers::stop_session))
        // Session queries
        .route("/sessions/:guild_id", get(handlers::list_sessions))
        .route("/sessions/:guild_id/latest", get(handlers::latest_session))
        // Knowledge search
        .route(
            "/knowledge/:guild_id/search",
            get(handlers::search_knowledge),
        )
        // Delivery receipts
        .route("/deliveries", post(handlers::record_delivery))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

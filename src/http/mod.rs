//! HTTP API server for session control and knowledge queries
//!
//! This module provides a REST API around the session manager and store:
//! - POST /sessions/start - Start capturing a voice room
//! - POST /sessions/:guild_id/stop - Stop the guild's active session
//! - GET /sessions/:guild_id - Active session plus recent history
//! - GET /sessions/:guild_id/latest - Latest session for a channel
//! - GET /knowledge/:guild_id/search - Full-text snippet search
//! - POST /deliveries - Record a summary delivery receipt
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

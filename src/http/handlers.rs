use super::state::AppState;
use crate::error::SessionError;
use crate::session::{StartOptions, StopOptions};
use crate::store::SessionRow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Guild the voice room belongs to
    pub guild_id: String,

    /// Voice room to capture
    pub channel_id: String,

    /// Member who requested the recording
    pub initiator_id: Option<String>,

    /// Optional topic carried into the summary prompt
    pub topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopSessionRequest {
    /// Member who requested the stop
    pub ended_by: Option<String>,

    /// Stop reason recorded in session metadata (default: "manual")
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    /// Maximum number of historical sessions to return (default: 10)
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    /// The guild's active session, if one is running
    pub active: Option<SessionRow>,

    /// Recent sessions, newest first
    pub sessions: Vec<SessionRow>,
}

#[derive(Debug, Deserialize)]
pub struct LatestSessionQuery {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,

    /// Maximum number of snippets to return (default: 5)
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RecordDeliveryRequest {
    pub session_id: i64,
    pub user_id: String,

    /// Member or automation that performed the delivery
    pub delivered_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordDeliveryResponse {
    pub session_id: i64,
    pub user_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn session_error(err: SessionError) -> Response {
    let status = match err {
        SessionError::AlreadyActive { .. } => StatusCode::CONFLICT,
        SessionError::NoActiveSession { .. } => StatusCode::NOT_FOUND,
        SessionError::InvalidTarget { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Session request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn storage_error(err: rusqlite::Error) -> Response {
    error!("Storage request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Storage error: {}", err),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/start
/// Start capturing the given voice room
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    info!(
        "Starting session for guild {} in channel {}",
        req.guild_id, req.channel_id
    );

    let opts = StartOptions {
        initiator_id: req.initiator_id,
        topic: req.topic,
    };

    match state
        .manager
        .start_session(&req.guild_id, &req.channel_id, opts)
        .await
    {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => session_error(e),
    }
}

/// POST /sessions/:guild_id/stop
/// Stop the guild's active session and return the capture outcome
pub async fn stop_session(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    body: Option<Json<StopSessionRequest>>,
) -> impl IntoResponse {
    info!("Stopping session for guild {}", guild_id);

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let opts = StopOptions {
        ended_by: req.ended_by,
        reason: req.reason,
    };

    match state.manager.stop_session(&guild_id, opts).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => session_error(e),
    }
}

/// GET /sessions/:guild_id
/// The guild's active session plus recent history
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Query(query): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(10);
    let active = state.manager.active_session(&guild_id).await;

    match state.store.list_sessions(&guild_id, limit) {
        Ok(sessions) => {
            (StatusCode::OK, Json(ListSessionsResponse { active, sessions })).into_response()
        }
        Err(e) => storage_error(e),
    }
}

/// GET /sessions/:guild_id/latest?channel_id=
/// The most recently started session for a specific channel
pub async fn latest_session(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Query(query): Query<LatestSessionQuery>,
) -> impl IntoResponse {
    match state
        .store
        .latest_session_for_channel(&guild_id, &query.channel_id)
    {
        Ok(Some(session)) => (StatusCode::OK, Json(session)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No session found for channel {}", query.channel_id),
            }),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

/// GET /knowledge/:guild_id/search?q=&limit=
/// Full-text search over the guild's knowledge snippets
pub async fn search_knowledge(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(5);

    match state.store.search(&guild_id, &query.q, limit) {
        Ok(snippets) => (StatusCode::OK, Json(snippets)).into_response(),
        Err(e) => storage_error(e),
    }
}

/// POST /deliveries
/// Record that a session summary was delivered to a member
pub async fn record_delivery(
    State(state): State<AppState>,
    Json(req): Json<RecordDeliveryRequest>,
) -> impl IntoResponse {
    let session = match state.store.get_session(req.session_id) {
        Ok(Some(session)) => session,
        Ok(None) => {
            error!("Session {} not found", req.session_id);
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Session {} not found", req.session_id),
                }),
            )
                .into_response();
        }
        Err(e) => return storage_error(e),
    };

    if let Err(e) = state
        .store
        .record_delivery(session.id, &req.user_id, req.delivered_by.as_deref())
    {
        return storage_error(e);
    }
    if let Err(e) = state.store.touch_broadcast(session.id, Utc::now()) {
        return storage_error(e);
    }

    info!(
        "Recorded delivery of session {} to user {}",
        session.id, req.user_id
    );

    (
        StatusCode::OK,
        Json(RecordDeliveryResponse {
            session_id: session.id,
            user_id: req.user_id,
            status: "recorded".to_string(),
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active_sessions = state.manager.registry().active_count().await;

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            service: state.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_sessions,
        }),
    )
        .into_response()
}

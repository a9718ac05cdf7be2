//! HTTP API handlers for matchd

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::MatchingEngine;
use crate::metrics::{EngineMetricsSnapshot, PipelineMetricsSnapshot};
use crate::registry::ConnectionRegistry;
use messaging::{Message, MessagingClient};

/// Shared state for the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<MatchingEngine>,
    pub registry: Arc<ConnectionRegistry>,
    pub messaging: Arc<dyn MessagingClient>,
    pub join_topic: String,
}

/// Request to join matchmaking
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: String,
}

/// Response for a join request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload published on the join topic
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinEvent<'a> {
    user_id: &'a str,
    match_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub engine: EngineMetricsSnapshot,
    pub pipeline: PipelineMetricsSnapshot,
    pub connections: usize,
    pub queued: usize,
}

/// Match id handed out for a user
pub fn match_id_for(user_id: &str) -> String {
    format!("match-{user_id}")
}

/// Hand out a match id and announce it on the join topic
pub async fn join(
    State(state): State<ApiState>,
    Json(req): Json<JoinRequest>,
) -> (StatusCode, Json<JoinResponse>) {
    let user_id = req.user_id.trim();
    if user_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(JoinResponse {
                success: false,
                match_id: None,
                message: Some("userId is required".to_string()),
            }),
        );
    }

    let match_id = match_id_for(user_id);
    let message = match Message::json(&JoinEvent {
        user_id,
        match_id: &match_id,
    }) {
        Ok(m) => m.with_key(user_id).with_header("source", "matchd"),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(JoinResponse {
                    success: false,
                    match_id: None,
                    message: Some(e.to_string()),
                }),
            );
        }
    };

    if let Err(e) = state.messaging.send(&state.join_topic, message).await {
        warn!(user_id, topic = %state.join_topic, error = %e, "Failed to publish join");
        return (
            StatusCode::BAD_GATEWAY,
            Json(JoinResponse {
                success: false,
                match_id: None,
                message: Some(e.to_string()),
            }),
        );
    }

    info!(user_id, match_id = %match_id, "Player joined matchmaking");
    (
        StatusCode::OK,
        Json(JoinResponse {
            success: true,
            match_id: Some(match_id),
            message: None,
        }),
    )
}

/// Engine and pipeline counters
pub async fn stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        engine: state.engine.snapshot(),
        pipeline: state.engine.pipeline().snapshot(),
        connections: state.registry.len(),
        queued: state.engine.queued(),
    })
}

/// Health check
pub async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let accepting = state.engine.pipeline().is_accepting();
    Json(serde_json::json!({
        "status": if accepting { "healthy" } else { "draining" },
        "service": "matchd",
        "engineRunning": state.engine.is_running(),
        "messaging": state.messaging.backend(),
    }))
}

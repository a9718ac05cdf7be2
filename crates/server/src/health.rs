//! `GET /health` liveness route

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct HealthState {
    pub service_name: String,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl HealthState {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

pub async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "startedAt": state.started_at.to_rfc3339(),
        "uptimeSeconds": state.uptime_seconds(),
    }))
}

/// Liveness route, merged into the service router
pub fn health_routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_handler() {
        let state = Arc::new(HealthState::new("matchd"));
        let Json(body) = health_handler(State(state)).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "matchd");
        assert_eq!(body["uptimeSeconds"], 0);
        assert!(body["startedAt"].as_str().is_some());
    }
}

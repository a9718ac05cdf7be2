//! HTTP routes for matchd

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::*;

/// Create the matchd router
///
/// Routes:
/// - POST /api/v1/match/join   - Request a match id
/// - GET  /api/v1/match/stats  - Engine and pipeline counters
/// - GET  /api/v1/match/health - Health check
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/match/join", post(join))
        .route("/api/v1/match/stats", get(stats))
        .route("/api/v1/match/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSettings, MatchingEngine};
    use crate::notifier::{NotificationPipeline, PipelineConfig};
    use crate::registry::ConnectionRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use messaging::{InMemoryClient, Message, MessagingClient};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn state(bus: Arc<InMemoryClient>) -> ApiState {
        let registry = Arc::new(ConnectionRegistry::new());
        let pipeline =
            NotificationPipeline::start(PipelineConfig::default(), registry.clone(), None).unwrap();
        let engine = MatchingEngine::new(EngineSettings::default(), Arc::new(pipeline)).unwrap();
        ApiState {
            engine: Arc::new(engine),
            registry,
            messaging: bus,
            join_topic: "match.join".to_string(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_join_returns_and_publishes_match_id() {
        let bus = Arc::new(InMemoryClient::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe(
                "match.join",
                Arc::new(move |msg: Message| {
                    let _ = tx.send(msg);
                }),
            )
            .await
            .unwrap();

        let app = create_router(state(bus));
        let response = app
            .oneshot(
                Request::post("/api/v1/match/join")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"userId":"u42"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["matchId"], "match-u42");

        let published = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published.key.as_deref(), Some("u42"));
        let event: serde_json::Value = serde_json::from_slice(&published.payload).unwrap();
        assert_eq!(event["matchId"], "match-u42");
    }

    #[tokio::test]
    async fn test_join_requires_user_id() {
        let app = create_router(state(Arc::new(InMemoryClient::new())));
        let response = app
            .oneshot(
                Request::post("/api/v1/match/join")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"userId":"  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_stats_reports_engine() {
        let state = state(Arc::new(InMemoryClient::new()));
        state.engine.submit("alice", 30, 2, "c1");
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::get("/api/v1/match/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["engine"]["submitted"], 1);
        assert_eq!(body["queued"], 1);
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state(Arc::new(InMemoryClient::new())));
        let response = app
            .oneshot(
                Request::get("/api/v1/match/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["messaging"], "memory");
    }
}

//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;
use uuid::Uuid;

use crate::app::{AppState, GameSnapshot};
use crate::game::milestones::MilestoneReport;
use crate::game::{EngineError, GameState};
use crate::store::StoreError;
use crate::util::time::uptime_secs;
use crate::voting::VoteDirection;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS: explicit allow-list from CLIENT_ORIGIN, anything when unset
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = if state.config.client_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let allowed_origins: Vec<header::HeaderValue> = state
            .config
            .client_origins
            .iter()
            .filter_map(|s| s.parse::<header::HeaderValue>().ok())
            .collect();
        cors.allow_origin(allowed_origins)
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/milestones", get(milestones_handler))
        .route("/vote", post(vote_handler))
        .route("/pause", post(pause_handler))
        .route("/reset", post(reset_handler))
        .route("/ws", get(ws_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Read endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    instance_id: Uuid,
    is_driver: bool,
    uptime_secs: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        instance_id: state.instance_id,
        is_driver: state.is_driver(),
        uptime_secs: uptime_secs(),
    })
}

async fn state_handler(State(state): State<AppState>) -> Json<GameSnapshot> {
    Json(state.snapshot())
}

async fn milestones_handler(State(state): State<AppState>) -> Json<MilestoneReport> {
    let score = state.mirror.state().score;
    let market_value = state.market.borrow().value;
    Json(MilestoneReport::new(score, market_value))
}

// ============================================================================
// Command endpoints
// ============================================================================

#[derive(Deserialize)]
struct VoteRequest {
    direction: VoteDirection,
}

#[derive(Serialize)]
struct VoteResponse {
    direction: VoteDirection,
    count: u64,
}

async fn vote_handler(
    State(state): State<AppState>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let count = state.votes.cast_vote(req.direction).await?;

    Ok(Json(VoteResponse {
        direction: req.direction,
        count,
    }))
}

async fn pause_handler(State(state): State<AppState>) -> Result<Json<GameState>, AppError> {
    Ok(Json(state.engine.toggle_pause().await?))
}

async fn reset_handler(State(state): State<AppState>) -> Result<Json<GameState>, AppError> {
    Ok(Json(state.engine.reset().await?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("This instance is not the game master")]
    NotDriver,

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotDriver => AppError::NotDriver,
            other => AppError::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        warn!(error = %e, "State not yet synchronized");
        AppError::Unavailable(format!("State not yet synchronized: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotDriver => (StatusCode::CONFLICT, self.to_string()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::game::master::Lease;
    use crate::store::{MemoryStore, SessionStore, SharedStore, Slot};

    fn app(primary: bool, backend: Arc<dyn SharedStore>) -> AppState {
        let flag = if primary { "true" } else { "false" };
        let config = Config::from_lookup(|key| match key {
            "OFFICIAL_GAME_MASTER" => Some(flag.to_string()),
            _ => None,
        })
        .unwrap();
        AppState::start(config, backend)
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_the_instance() {
        let state = app(true, Arc::new(MemoryStore::new()));
        let instance_id = state.instance_id;
        let router = build_router(state);

        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["instance_id"], instance_id.to_string());
    }

    #[tokio::test]
    async fn votes_are_counted() {
        let router = build_router(app(false, Arc::new(MemoryStore::new())));

        let (status, body) = call(&router, Method::POST, "/vote", Some(r#"{"direction":"left"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (_, body) = call(&router, Method::POST, "/vote", Some(r#"{"direction":"left"}"#)).await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn malformed_votes_are_rejected() {
        let router = build_router(app(false, Arc::new(MemoryStore::new())));

        let (status, body) = call(&router, Method::POST, "/vote", Some(r#"{"direction":"up"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn observers_cannot_pause_or_reset() {
        let backend: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone(), "game/current");
        let lease = Lease {
            timestamp: crate::util::time::unix_millis(),
            is_primary: true,
            holder: Uuid::new_v4(),
        };
        store.write(Slot::GameMaster, &lease).await.unwrap();

        let router = build_router(app(false, backend));

        let (status, _) = call(&router, Method::POST, "/pause", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(&router, Method::POST, "/reset", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn the_driver_toggles_pause() {
        let state = app(true, Arc::new(MemoryStore::new()));
        state.driver.clone().wait_for(|d| *d).await.unwrap();
        let router = build_router(state);

        let (status, body) = call(&router, Method::POST, "/pause", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isPaused"], true);

        let (_, body) = call(&router, Method::POST, "/pause", None).await;
        assert_eq!(body["isPaused"], false);
    }

    #[tokio::test]
    async fn milestones_start_at_zero() {
        let router = build_router(app(false, Arc::new(MemoryStore::new())));

        let (status, body) = call(&router, Method::GET, "/milestones", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scoreMilestones"][0]["target"], 2000);
        assert_eq!(body["scoreMilestones"][0]["current"], true);
        assert_eq!(body["marketMilestones"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn state_includes_the_vote_summary() {
        let router = build_router(app(false, Arc::new(MemoryStore::new())));

        let (status, body) = call(&router, Method::GET, "/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["votes"]["totalVotes"], 0);
        assert_eq!(body["state"]["lives"], 3);
        assert!(body["market"].is_object());
    }
}

//! HTTP request handler
//!
//! Thin synchronous boundary over the cache and the control loop. A chat
//! request checks the semantic cache first; on a miss the whole control loop
//! runs under the caller's timeout, and only a complete answer is written
//! back to the cache.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::RagAgent;
use crate::cache::SemanticCache;
use crate::citations::Citation;
use crate::error::Error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SemanticCache>,
    pub agent: Arc<RagAgent>,
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache", delete(cache_clear))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---- Request / Response types ----

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_timeout_s() -> u64 {
    60
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub trace_id: Uuid,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub entries: usize,
}

// ---- Error handling ----

/// Wrapper mapping crate errors onto structured HTTP responses
pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self.0);
        }
        let body = Json(serde_json::json!({
            "error": { "kind": self.0.kind(), "message": self.0.to_string() }
        }));
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

// ---- Handlers ----

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        entries: state.cache.size().await,
    })
}

async fn cache_clear(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.clear().await;
    Json(serde_json::json!({ "status": "cleared" }))
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(Error::InvalidInput("message must not be empty".into()).into());
    }
    if req.timeout_s < 1 {
        return Err(Error::InvalidInput("timeout_s must be >= 1".into()).into());
    }

    let trace_id = Uuid::new_v4();

    // Semantic cache lookup: a hit never touches the orchestrator.
    if let Some((answer, citations)) = state.cache.get(&req.message).await? {
        info!(%trace_id, "semantic cache hit");
        return Ok(Json(ChatResponse {
            trace_id,
            answer,
            citations,
            cached: true,
        }));
    }

    // Cache miss: run the full control loop under the caller's budget.
    // On timeout the in-flight future is dropped; no partial answer and
    // no cache write happen.
    let outcome = match timeout(
        Duration::from_secs(req.timeout_s),
        state.agent.run(&req.message),
    )
    .await
    {
        Err(_) => {
            return Err(Error::Timeout(format!("Timeout after {}s", req.timeout_s)).into());
        }
        Ok(result) => result?,
    };

    state
        .cache
        .put(&req.message, &outcome.answer, outcome.citations.clone())
        .await?;

    Ok(Json(ChatResponse {
        trace_id,
        answer: outcome.answer,
        citations: outcome.citations,
        cached: false,
    }))
}

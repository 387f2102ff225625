//! REST API Server for the Financial Assistant
//!
//! Exposes the query and ingestion entry points via HTTP endpoints
//! Integrates with frontend UI

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::index::Indexer;
use crate::orchestrator::Orchestrator;
use crate::speech::SpeechService;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceParams {
    pub session_id: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub indexer: Arc<Indexer>,
    pub speech: Option<Arc<dyn SpeechService>>,
}

fn session_or_default(session_id: Option<String>) -> String {
    session_id
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "default-session".to_string())
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Query Endpoint
/// =============================

async fn run_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Query text is required".into())),
        );
    }

    let session_id = session_or_default(req.session_id);
    info!(%session_id, "Received query request");

    let outcome = state.orchestrator.query(&req.text, &session_id).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "text": outcome.text,
            "citations": outcome.citations,
            "session_id": session_id,
        }))),
    )
}

/// =============================
/// Ingestion Endpoint
/// =============================

async fn run_ingest(
    State(state): State<ApiState>,
    Json(req): Json<IngestRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.doc_id.trim().is_empty() || req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("doc_id and text are required".into())),
        );
    }

    info!(doc_id = %req.doc_id, "Received ingest request");

    match state
        .indexer
        .ingest(&req.doc_id, &req.text, req.metadata)
        .await
    {
        Ok(chunk_ids) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "doc_id": req.doc_id,
                "chunk_count": chunk_ids.len(),
                "chunk_ids": chunk_ids,
            }))),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::error(format!("Ingestion failed: {}", e))),
        ),
    }
}

/// =============================
/// Voice Endpoint
/// =============================

/// Transcribe → query → synthesize. The synthesized audio is returned
/// hex-encoded alongside the text answer.
async fn run_voice(
    State(state): State<ApiState>,
    Query(params): Query<VoiceParams>,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(speech) = state.speech.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("Speech service is not configured".into())),
        );
    };

    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Audio body is required".into())),
        );
    }

    let text = match speech.transcribe(&body).await {
        Ok(text) => text,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(format!("Transcription failed: {}", e))),
            );
        }
    };

    let session_id = session_or_default(params.session_id);
    info!(%session_id, transcript = %text, "Voice query transcribed");

    let outcome = state.orchestrator.query(&text, &session_id).await;

    let audio_hex = match speech.synthesize(&outcome.text).await {
        Ok(audio) => Some(hex::encode(audio)),
        Err(e) => {
            info!("Synthesis failed, returning text only: {}", e);
            None
        }
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "transcript": text,
            "text": outcome.text,
            "citations": outcome.citations,
            "audio_hex": audio_hex,
            "session_id": session_id,
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/query", post(run_query))
        .route("/api/ingest", post(run_ingest))
        .route("/api/voice", post(run_voice))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

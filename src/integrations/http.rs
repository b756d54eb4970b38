//! HTTP 接口
//!
//! - `POST /api/chat`：`{query, history}` → `{answer}`；失败时 `{error, code, details}`
//!   （empty_query → 400，no_matches → 404，其余 → 500）
//! - `POST /api/ingest`：`{threads: [...]}` → 入库统计；未配置嵌入服务时 503
//! - `GET /api/health`

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::agent::AppServices;
use crate::core::AnswerError;
use crate::ingest::{ChatThread, ThreadIngestor};
use crate::memory::Message;
use crate::pipeline::Orchestrator;

pub struct HttpState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingestor: Option<Arc<ThreadIngestor>>,
}

impl From<&AppServices> for HttpState {
    fn from(services: &AppServices) -> Self {
        Self {
            orchestrator: Arc::clone(&services.orchestrator),
            ingestor: services.ingestor.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub threads: Vec<ChatThread>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub upserted: usize,
    pub skipped_empty: usize,
    pub skipped_failed: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn answer_error(e: &AnswerError) -> ApiError {
    let (status, error, details) = match e {
        AnswerError::EmptyQuery => (
            StatusCode::BAD_REQUEST,
            "Query parameter is required.".to_string(),
            None,
        ),
        AnswerError::NoMatches => (StatusCode::NOT_FOUND, e.to_string(), None),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "An error occurred while processing your request.".to_string(),
            Some(other.to_string()),
        ),
    };
    (
        status,
        Json(ErrorResponse {
            error,
            code: e.code().to_string(),
            details,
        }),
    )
}

pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/ingest", post(api_ingest))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn api_chat(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    tracing::info!(history = req.history.len(), query_len = req.query.len(), "chat request");
    match state.orchestrator.answer(&req.history, &req.query).await {
        Ok(answer) => Ok(Json(ChatResponse { answer })),
        Err(e) => Err(answer_error(&e)),
    }
}

async fn api_ingest(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Some(ingestor) = state.ingestor.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "ingestion is not configured".to_string(),
                code: "ingest_unavailable".to_string(),
                details: None,
            }),
        ));
    };
    match ingestor.ingest(&req.threads).await {
        Ok(report) => Ok(Json(IngestResponse {
            upserted: report.upserted,
            skipped_empty: report.skipped_empty,
            skipped_failed: report.skipped_failed,
        })),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: "ingestion failed".to_string(),
                code: "ingest_failed".to_string(),
                details: Some(e.to_string()),
            }),
        )),
    }
}

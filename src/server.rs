//! JSON HTTP API.
//!
//! Thin transport over [`Tabula`]: every handler validates its input,
//! calls one service operation and serializes the result.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/query` | Tabular question → `QueryResult` |
//! | `POST` | `/chat` | Document Q&A |
//! | `POST` | `/chat/stream` | Document Q&A as server-sent events |
//! | `POST` | `/tables/ingest` | Index CSV files for a tenant/source |
//! | `POST` | `/documents` | Index free text for a tenant/source |
//! | `GET`  | `/tenants/{tenant_id}/contents` | Raw chunk listing |
//! | `GET`  | `/tenants/{tenant_id}/relationships` | Detected join candidates |
//! | `DELETE` | `/tenants/{tenant_id}` | Purge all tenant data |
//! | `DELETE` | `/tenants/{tenant_id}/sources/{source_id}` | Delete one source |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `provider_error` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use tabula_core::error::Error;
use tabula_core::llm::ChatMessage;
use tabula_core::models::{MetadataFilter, QueryResult, StoredChunk};
use tabula_core::relationships::JoinCandidate;

use crate::config::Config;
use crate::ingest::IngestReport;
use crate::service::{ChatAnswer, Tabula};
use crate::stream::StreamEvent;

#[derive(Clone)]
struct AppState {
    service: Arc<Tabula>,
}

/// Build the service from `config` and serve until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(Tabula::from_config(config).await?);
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// The route table, exposed for embedding in other servers.
pub fn router(service: Arc<Tabula>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/tables/ingest", post(handle_ingest_tables))
        .route("/documents", post(handle_ingest_text))
        .route("/tenants/{tenant_id}", delete(handle_purge_tenant))
        .route("/tenants/{tenant_id}/contents", get(handle_contents))
        .route("/tenants/{tenant_id}/relationships", get(handle_relationships))
        .route(
            "/tenants/{tenant_id}/sources/{source_id}",
            delete(handle_delete_source),
        )
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn source_set(sources: Option<Vec<String>>) -> Option<BTreeSet<String>> {
    sources
        .map(|s| s.into_iter().collect::<BTreeSet<_>>())
        .filter(|s| !s.is_empty())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    tenant_id: String,
    #[serde(default)]
    source_ids: Option<Vec<String>>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    require(&req.query, "query")?;
    require(&req.tenant_id, "tenant_id")?;
    let sources = source_set(req.source_ids);
    let result = state
        .service
        .submit_query(&req.query, &req.tenant_id, sources.as_ref())
        .await?;
    Ok(Json(result))
}

// ============ POST /chat, /chat/stream ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    tenant_id: String,
    #[serde(default)]
    source_ids: Option<Vec<String>>,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, AppError> {
    require(&req.query, "query")?;
    require(&req.tenant_id, "tenant_id")?;
    let sources = source_set(req.source_ids);
    let answer = state
        .service
        .answer(&req.query, &req.tenant_id, sources.as_ref(), &req.history)
        .await?;
    Ok(Json(answer))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require(&req.query, "query")?;
    require(&req.tenant_id, "tenant_id")?;
    let sources = source_set(req.source_ids);
    let rx = state
        .service
        .answer_stream(&req.query, &req.tenant_id, sources.as_ref(), &req.history)
        .await;

    // Ends after the first terminal event.
    let events = stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        let event = rx.recv().await?;
        let terminal = event.is_terminal();
        Some((Ok(to_sse(&event)), (rx, terminal)))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

// ============ POST /tables/ingest ============

#[derive(Deserialize)]
struct IngestTablesRequest {
    tenant_id: String,
    source_id: String,
    paths: Vec<PathBuf>,
    #[serde(default)]
    force: bool,
}

async fn handle_ingest_tables(
    State(state): State<AppState>,
    Json(req): Json<IngestTablesRequest>,
) -> Result<Json<IngestReport>, AppError> {
    require(&req.tenant_id, "tenant_id")?;
    require(&req.source_id, "source_id")?;
    if req.paths.is_empty() {
        return Err(bad_request("paths must not be empty"));
    }
    let report = state
        .service
        .ingest_tables(&req.paths, &req.tenant_id, &req.source_id, req.force)
        .await?;
    Ok(Json(report))
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct IngestTextRequest {
    tenant_id: String,
    source_id: String,
    text: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

async fn handle_ingest_text(
    State(state): State<AppState>,
    Json(req): Json<IngestTextRequest>,
) -> Result<Json<CountResponse>, AppError> {
    require(&req.tenant_id, "tenant_id")?;
    require(&req.source_id, "source_id")?;
    let count = state
        .service
        .ingest_text(&req.text, &req.tenant_id, &req.source_id, req.metadata)
        .await?;
    Ok(Json(CountResponse { count }))
}

// ============ /tenants/{tenant_id} ============

#[derive(Deserialize)]
struct ContentsParams {
    source_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    filename: Option<String>,
}

#[derive(Serialize)]
struct ContentsResponse {
    tenant_id: String,
    count: usize,
    chunks: Vec<StoredChunk>,
}

async fn handle_contents(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<ContentsParams>,
) -> Result<Json<ContentsResponse>, AppError> {
    let mut filter = MetadataFilter::tenant(tenant_id.clone());
    if let Some(source) = params.source_id {
        filter = filter.with_source(source);
    }
    if let Some(kind) = params.kind {
        filter = filter.with_kind(&kind);
    }
    if let Some(filename) = params.filename {
        filter = filter.with_filename(filename);
    }
    let chunks = state.service.fetch_contents(&filter).await?;
    Ok(Json(ContentsResponse {
        tenant_id,
        count: chunks.len(),
        chunks,
    }))
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: usize,
}

async fn handle_purge_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    let deleted = state.service.purge_tenant(&tenant_id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn handle_delete_source(
    State(state): State<AppState>,
    Path((tenant_id, source_id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let deleted = state.service.delete_source(&tenant_id, &source_id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[derive(Serialize)]
struct RelationshipsResponse {
    tenant_id: String,
    relationships: Vec<JoinCandidate>,
}

async fn handle_relationships(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<RelationshipsResponse>, AppError> {
    let relationships = state.service.relationships(&tenant_id).await?;
    Ok(Json(RelationshipsResponse {
        tenant_id,
        relationships,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let e: AppError = Error::Provider("down".into()).into();
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.code, "provider_error");
        let e: AppError = Error::NotFound("x".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        let e: AppError = Error::Store("locked".into()).into();
        assert_eq!(e.code, "internal");
    }

    #[test]
    fn test_source_set_empty_is_unrestricted() {
        assert!(source_set(Some(vec![])).is_none());
        assert!(source_set(None).is_none());
        assert_eq!(source_set(Some(vec!["a".into(), "a".into()])).map(|s| s.len()), Some(1));
    }
}

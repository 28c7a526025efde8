//! JSON HTTP API.
//!
//! Exposes analyses and their enrichment to downstream renderers
//! (documentation browser, diagram view, chat panel).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/repos/analyze` | Analyze `{ "repo": "...", "force": false }` |
//! | `GET`  | `/repos/{owner}/{name}` | Repository record and status |
//! | `GET`  | `/repos/{owner}/{name}/analysis` | Completed analysis |
//! | `GET`  | `/repos/{owner}/{name}/graph?related=true` | Architecture graph |
//! | `GET`  | `/repos/{owner}/{name}/subsystems/{subsystem}/description?refresh=true` | Subsystem description |
//! | `GET`  | `/repos/{owner}/{name}/subsystems/{subsystem}/related?limit=4` | Related subsystems |
//! | `POST` | `/repos/{owner}/{name}/explain` | Explain `{ "path": "...", "refresh": false }` |
//! | `GET`  | `/repos/{owner}/{name}/chat?client=...` | Current session and recent messages |
//! | `POST` | `/repos/{owner}/{name}/chat` | Ask `{ "message": "...", "client": "..." }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "repository not found or inaccessible: acme/x" } }
//! ```
//!
//! Analysis error categories map to `400` (invalid_input), `404`
//! (not_found), `429` (rate_limited), `502` (network_error,
//! generation_error), `504` (timeout) and `500` (persistence_error).
//! Read-side errors: `not_analyzed`, `unknown_subsystem` and
//! `unknown_file` are `404`.
//!
//! Work that writes shared state (analysis runs, generation) is spawned,
//! so a client disconnect does not abort it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatReply, DEFAULT_CLIENT};
use crate::describe::Enrichment;
use crate::error::{AnalysisError, QueryError};
use crate::graph::Graph;
use crate::models::{
    AnalysisResult, ChatMessage, ChatSession, FileExplanation, Repository, SubsystemDescription,
};
use crate::pipeline::{AnalysisOutcome, Pipeline};

/// Builds the router over a shared pipeline.
pub fn router(pipeline: Pipeline) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/repos/analyze", post(handle_analyze))
        .route("/repos/{owner}/{name}", get(handle_repository))
        .route("/repos/{owner}/{name}/analysis", get(handle_analysis))
        .route("/repos/{owner}/{name}/graph", get(handle_graph))
        .route(
            "/repos/{owner}/{name}/subsystems/{subsystem}/description",
            get(handle_description),
        )
        .route(
            "/repos/{owner}/{name}/subsystems/{subsystem}/related",
            get(handle_related),
        )
        .route("/repos/{owner}/{name}/explain", post(handle_explain))
        .route(
            "/repos/{owner}/{name}/chat",
            get(handle_history).post(handle_chat),
        )
        .layer(cors)
        .with_state(pipeline)
}

/// Serves the API on `listener` until the process stops.
pub async fn serve(listener: tokio::net::TcpListener, pipeline: Pipeline) -> anyhow::Result<()> {
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

/// Binds `[server].bind` and serves.
pub async fn run_server(bind: &str, pipeline: Pipeline) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP API listening");
    serve(listener, pipeline).await
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        let status = match &err {
            AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AnalysisError::NotFound(_) => StatusCode::NOT_FOUND,
            AnalysisError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AnalysisError::Network(_) | AnalysisError::Generation(_) => StatusCode::BAD_GATEWAY,
            AnalysisError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AnalysisError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.category().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Analysis(inner) => inner.into(),
            QueryError::Persistence(inner) => {
                tracing::error!(error = %inner, "request failed");
                internal(format!("{:#}", inner))
            }
            other => AppError {
                status: StatusCode::NOT_FOUND,
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Runs `work` on its own task so it completes even if the client goes away.
async fn detached<T, E, F>(work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(internal(format!("task failed: {}", e))),
    }
}

fn repo_input(owner: &str, name: &str) -> String {
    format!("{}/{}", owner, name)
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

// ============ POST /repos/analyze ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    repo: String,
    #[serde(default)]
    force: bool,
}

async fn handle_analyze(
    State(pipeline): State<Pipeline>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisOutcome>, AppError> {
    if req.repo.trim().is_empty() {
        return Err(bad_request("repo must not be empty"));
    }
    let outcome = detached(async move { pipeline.analyze(&req.repo, req.force).await }).await?;
    Ok(Json(outcome))
}

// ============ GET /repos/{owner}/{name} ============

async fn handle_repository(
    State(pipeline): State<Pipeline>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<Repository>, AppError> {
    let input = repo_input(&owner, &name);
    pipeline
        .repository(&input)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown repository: {}", input)))
}

async fn handle_analysis(
    State(pipeline): State<Pipeline>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<AnalysisResult>, AppError> {
    let (_, analysis) = pipeline.analysis(&repo_input(&owner, &name)).await?;
    Ok(Json(analysis))
}

// ============ GET .../graph ============

#[derive(Deserialize)]
struct GraphParams {
    #[serde(default)]
    related: bool,
}

async fn handle_graph(
    State(pipeline): State<Pipeline>,
    Path((owner, name)): Path<(String, String)>,
    Query(params): Query<GraphParams>,
) -> Result<Json<Graph>, AppError> {
    let graph = pipeline
        .graph(&repo_input(&owner, &name), params.related)
        .await?;
    Ok(Json(graph))
}

// ============ Subsystems ============

#[derive(Deserialize)]
struct DescriptionParams {
    #[serde(default)]
    refresh: bool,
}

async fn handle_description(
    State(pipeline): State<Pipeline>,
    Path((owner, name, subsystem)): Path<(String, String, String)>,
    Query(params): Query<DescriptionParams>,
) -> Result<Json<Enrichment<SubsystemDescription>>, AppError> {
    let input = repo_input(&owner, &name);
    let described = detached(async move {
        pipeline
            .describe(&input, &subsystem, params.refresh)
            .await
    })
    .await?;
    Ok(Json(described))
}

#[derive(Deserialize)]
struct RelatedParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RelatedResponse {
    subsystem: String,
    related: Vec<String>,
}

async fn handle_related(
    State(pipeline): State<Pipeline>,
    Path((owner, name, subsystem)): Path<(String, String, String)>,
    Query(params): Query<RelatedParams>,
) -> Result<Json<RelatedResponse>, AppError> {
    let related = pipeline
        .related(&repo_input(&owner, &name), &subsystem, params.limit)
        .await?;
    Ok(Json(RelatedResponse { subsystem, related }))
}

// ============ POST .../explain ============

#[derive(Deserialize)]
struct ExplainRequest {
    path: String,
    #[serde(default)]
    refresh: bool,
}

async fn handle_explain(
    State(pipeline): State<Pipeline>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<ExplainRequest>,
) -> Result<Json<Enrichment<FileExplanation>>, AppError> {
    let input = repo_input(&owner, &name);
    let explained =
        detached(async move { pipeline.explain(&input, &req.path, req.refresh).await }).await?;
    Ok(Json(explained))
}

// ============ Chat ============

#[derive(Deserialize)]
struct HistoryParams {
    client: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    session: ChatSession,
    messages: Vec<ChatMessage>,
}

async fn handle_history(
    State(pipeline): State<Pipeline>,
    Path((owner, name)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let client = params.client.unwrap_or_else(|| DEFAULT_CLIENT.to_string());
    let (session, messages) = pipeline
        .history(&repo_input(&owner, &name), &client)
        .await?;
    Ok(Json(HistoryResponse { session, messages }))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    client: Option<String>,
}

async fn handle_chat(
    State(pipeline): State<Pipeline>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let input = repo_input(&owner, &name);
    let client = req.client.unwrap_or_else(|| DEFAULT_CLIENT.to_string());
    let reply =
        detached(async move { pipeline.chat(&input, &client, &req.message).await }).await?;
    Ok(Json(reply))
}

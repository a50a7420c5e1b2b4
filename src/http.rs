//! HTTP surface (§6). Thin handlers: deserialize, call into the core
//! (organize service / batch processor), serialize the result. No
//! business logic lives here, matching SPEC_FULL's ambient-stack note.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::batch::{self, BatchRuntime, SubmitOutcome};
use crate::error::OrganizerError;
use crate::model::{FileInput, OrganizePlan};
use crate::organize;

#[derive(Clone)]
pub struct AppState {
    pub runtime: BatchRuntime,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/organize", post(organize_handler))
        .route("/process", post(process_handler))
        .route("/status/{batch_id}/{chunk_id}", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct OrganizeRequestBody {
    directory_path: String,
    files: Vec<FileInput>,
    #[serde(default)]
    custom_prompt: Option<String>,
    #[serde(default)]
    strategy_guidance: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrganizeResponseBody {
    #[serde(flatten)]
    plan: OrganizePlan,
    tokens: TokenUsage,
    cost: f64,
}

#[derive(Debug, Serialize)]
struct TokenUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<OrganizerError> for ApiError {
    fn from(err: OrganizerError) -> Self {
        let status = match &err {
            OrganizerError::Validation(_) => StatusCode::BAD_REQUEST,
            OrganizerError::LlmTransient(_) | OrganizerError::StoreTransient(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

/// `POST /organize` — synchronous single-request organization (§6).
#[instrument(skip_all, fields(directory_path = %body.directory_path, files = body.files.len()))]
async fn organize_handler(
    State(state): State<AppState>,
    Json(body): Json<OrganizeRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;
    let approx_size: usize = body.files.iter().map(|f| f.content.len() + f.name.len()).sum();
    if approx_size > MAX_REQUEST_BYTES {
        return Err(ApiError(
            StatusCode::PAYLOAD_TOO_LARGE,
            "request exceeds 10 MiB".to_string(),
        ));
    }

    let outcome = organize::organize(
        &state.runtime.config,
        &state.runtime.llm,
        &body.directory_path,
        &body.files,
        body.custom_prompt.as_deref(),
        body.strategy_guidance.as_deref(),
    )
    .await?;

    Ok(Json(OrganizeResponseBody {
        plan: outcome.plan,
        tokens: TokenUsage {
            prompt_tokens: outcome.prompt_tokens,
            completion_tokens: outcome.completion_tokens,
        },
        cost: outcome.cost,
    }))
}

#[derive(Debug, Deserialize)]
struct ProcessRequestBody {
    batch_id: String,
    chunk_id: String,
    ids: Vec<String>,
    #[serde(default)]
    custom_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProcessResponseBody {
    status: String,
    chunk_id: String,
    total: usize,
}

/// `POST /process` — async batch submit (§6, §4.J entry point).
#[instrument(skip_all, fields(batch_id = %body.batch_id, chunk_id = %body.chunk_id, ids = body.ids.len()))]
async fn process_handler(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = batch::submit(
        &state.runtime,
        &body.batch_id,
        &body.chunk_id,
        &body.ids,
        body.custom_prompt,
    )
    .await?;

    let (status, total) = match outcome {
        SubmitOutcome::Accepted { total } => ("accepted", total),
        SubmitOutcome::AlreadyProcessing => ("already_processing", body.ids.len()),
    };

    info!(batch_id = %body.batch_id, status, "process request handled");

    Ok(Json(ProcessResponseBody {
        status: status.to_string(),
        chunk_id: body.chunk_id,
        total,
    }))
}

/// `GET /status/{batch_id}/{chunk_id}` (§6).
async fn status_handler(
    State(state): State<AppState>,
    Path((batch_id, chunk_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    match batch::status(&state.runtime, &batch_id, &chunk_id).await? {
        Some(response) => Ok(Json(serde_json::to_value(response).unwrap_or_default())),
        None => Ok(Json(serde_json::json!({"status": "not_found"}))),
    }
}

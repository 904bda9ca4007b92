use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chronod_core::{CreateJobRequest, JobPatch};
use chronod_scheduler::SchedulerError;
use serde_json::json;

use crate::app::AppState;

/// Maps scheduler errors onto the HTTP surface. Validation and not-found
/// stay distinguishable; storage errors surface as 500 without detail.
pub struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            SchedulerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            SchedulerError::AlreadyExists { .. } => (StatusCode::CONFLICT, "JOB_ALREADY_EXISTS"),
            SchedulerError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            SchedulerError::Database(_) | SchedulerError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.0.to_string(),
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

/// POST /v1/jobs — validate, persist, and arm a new job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Response, ApiError> {
    let job = state.scheduler.schedule(request)?;
    Ok((StatusCode::CREATED, Json(job)).into_response())
}

/// GET /v1/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.scheduler.get(&id)? {
        Some(job) => Ok(Json(job).into_response()),
        None => Err(SchedulerError::JobNotFound { id }.into()),
    }
}

/// PATCH /v1/jobs/{id} — merge schedule-affecting fields only.
pub async fn patch_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> Result<Response, ApiError> {
    let job = state.scheduler.reschedule(&id, &patch)?;
    Ok(Json(job).into_response())
}

/// DELETE /v1/jobs/{id} — cancel; terminal/missing ids are 404.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.scheduler.cancel(&id)?;
    Ok(Json(job).into_response())
}

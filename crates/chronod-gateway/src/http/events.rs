use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chronod_messaging::JobLifecycleEvent;
use serde_json::json;

use crate::app::AppState;

/// POST /v1/events — hand a lifecycle event to the messaging adapter.
///
/// This is the embedded stand-in for an external transport binding: the
/// event is only enqueued here; creation/cancellation outcomes surface as
/// status events, not in this response.
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<JobLifecycleEvent>,
) -> impl IntoResponse {
    match state.lifecycle_tx.try_send(event) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "QUEUE_FULL",
                "message": "lifecycle event queue is full or closed",
            })),
        ),
    }
}

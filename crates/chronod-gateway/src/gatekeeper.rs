use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;

use crate::app::AppState;

/// Reject synchronous job operations while this instance is not master.
///
/// Writes through a non-leader would race the leader's timer state
/// (split-brain); a 503 tells well-behaved clients to retry against the
/// current leader instead.
pub async fn require_master(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.coordinator.is_master() {
        return next.run(request).await;
    }
    debug!(path = %request.uri().path(), "rejecting request — not master");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "NOT_MASTER",
            "message": "this instance does not hold cluster leadership",
        })),
    )
        .into_response()
}

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chronod_cluster::ClusterCoordinator;
use chronod_core::config::ChronodConfig;
use chronod_messaging::JobLifecycleEvent;
use chronod_scheduler::SchedulerHandle;
use tokio::sync::mpsc;

/// Central shared state — passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: ChronodConfig,
    pub scheduler: SchedulerHandle,
    pub coordinator: Arc<ClusterCoordinator>,
    /// Entry point for embedded transports that feed lifecycle events
    /// (the message consumer is wired outside the HTTP surface).
    pub lifecycle_tx: mpsc::Sender<JobLifecycleEvent>,
}

/// Assemble the full Axum router.
///
/// Every job route sits behind the mastership gatekeeper; only `/health`
/// is served unconditionally so load balancers can probe non-master
/// instances without tripping the 503.
pub fn build_router(state: Arc<AppState>) -> Router {
    let jobs = Router::new()
        .route("/v1/jobs", post(crate::http::jobs::create_job))
        .route(
            "/v1/jobs/{id}",
            get(crate::http::jobs::get_job)
                .patch(crate::http::jobs::patch_job)
                .delete(crate::http::jobs::delete_job),
        )
        .route("/v1/events", post(crate::http::events::ingest_event))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            crate::gatekeeper::require_master,
        ));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .merge(jobs)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

mod app;
mod gatekeeper;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chronod_gateway=info,chronod_scheduler=info,chronod_cluster=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: CHRONOD_CONFIG env > ./chronod.toml > defaults
    let config_path = std::env::var("CHRONOD_CONFIG").ok();
    let config = chronod_core::config::ChronodConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            chronod_core::config::ChronodConfig::default()
        });

    let bind = config.server.bind.clone();
    let port = config.server.port;

    // initialize SQLite database — single file shared by jobs and leader row
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    // run all schema migrations (idempotent)
    chronod_scheduler::db::init_db(&db)?;
    chronod_cluster::db::init_db(&db)?;
    info!("database migrations complete");

    // subsystems get their own connections for thread safety
    let repo: Arc<dyn chronod_scheduler::JobRepository> = Arc::new(
        chronod_scheduler::SqliteJobRepository::new(rusqlite::Connection::open(db_path)?)?,
    );
    let coordinator = Arc::new(chronod_cluster::ClusterCoordinator::new(
        rusqlite::Connection::open(db_path)?,
        &config.cluster,
    )?);

    // delivery executors, one per recipient kind
    let request_timeout = Duration::from_millis(config.delivery.request_timeout_ms);
    let mut registry = chronod_executor::ExecutorRegistry::new();
    registry.register(Arc::new(chronod_executor::HttpCallbackExecutor::new(
        request_timeout,
    )?));
    registry.register(Arc::new(chronod_executor::SinkExecutor::new(
        request_timeout,
    )?));
    let delegate = Arc::new(chronod_executor::DelegateExecutor::new(registry));

    let (engine, scheduler, events_rx) = chronod_scheduler::SchedulerEngine::new(
        repo,
        delegate,
        config.scheduler.clone(),
        coordinator.subscribe(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // heartbeat loop: claims or renews leadership, flips the mastership watch
    tokio::spawn(Arc::clone(&coordinator).run(shutdown_rx.clone()));

    // timer engine: arms and fires jobs while master
    tokio::spawn(engine.run(shutdown_rx.clone()));

    // status event publisher: drains the engine's channel with bounded retry
    let publisher: Arc<dyn chronod_messaging::EventPublisher> =
        Arc::new(chronod_messaging::RetryingPublisher::new(
            chronod_messaging::LogPublisher,
            config.delivery.publish_max_attempts,
            Duration::from_millis(config.delivery.publish_base_delay_ms),
        ));
    tokio::spawn(chronod_messaging::run_publisher(
        events_rx,
        publisher,
        shutdown_rx.clone(),
    ));

    // lifecycle adapter: inbound create/cancel events, consumed only as master
    let (lifecycle_tx, lifecycle_rx) =
        tokio::sync::mpsc::channel::<chronod_messaging::JobLifecycleEvent>(256);
    let adapter =
        chronod_messaging::LifecycleAdapter::new(scheduler.clone(), coordinator.subscribe());
    tokio::spawn(adapter.run(lifecycle_rx, shutdown_rx.clone()));

    let state = Arc::new(app::AppState {
        config,
        scheduler,
        coordinator,
        lifecycle_tx,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("chronod gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // stop heartbeat, timers, and the publisher drain loop
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

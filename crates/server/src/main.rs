mod config;
mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use db::DBService;
use services::services::{
    delivery_worker::DeliveryWorkerService, forwarder::ForwardService,
    scheduler::DeliveryScheduler,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub scheduler: DeliveryScheduler,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let db = DBService::new(&config.database_url).await?;

    let scheduler = DeliveryScheduler::new(db.pool.clone(), config.queue_max_retries);
    let requeued = scheduler.requeue_stale().await?;
    if requeued > 0 {
        info!(requeued, "returned orphaned jobs to the queue");
    }
    let sweeper = scheduler.spawn_retention_sweeper();

    let forwarder = ForwardService::new(&config.base_url)?;
    let worker = DeliveryWorkerService::spawn(
        db.pool.clone(),
        scheduler.clone(),
        forwarder,
        config.queue_concurrency,
    );

    let state = AppState {
        db,
        scheduler,
        config: config.clone(),
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "HookFreight listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // In-flight capture handlers have drained; now let active deliveries
    // finish and return everything else to the queue.
    info!("HTTP server drained, stopping delivery workers");
    worker.shutdown().await;
    sweeper.abort();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

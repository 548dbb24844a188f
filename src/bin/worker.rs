use entity_verify::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::{redis_backend::RedisBackend, scheduler::shutdown_on},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting entity verification worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Connecting to Redis job backend");
    let backend = RedisBackend::new(&config.redis_url).expect("Failed to initialize Redis backend");

    let state = AppState::new(db_pool, Arc::new(backend), &config);
    let scheduler = state.scheduler(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_on(tokio::signal::ctrl_c(), shutdown_tx));

    tracing::info!(
        interval_secs = config.scheduler_interval_secs,
        batch_size = config.scheduler_batch_size,
        "Worker ready, starting verification scheduler"
    );

    scheduler.run(shutdown_rx).await;

    tracing::info!("Worker stopped");
}

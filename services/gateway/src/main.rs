use std::env;
use std::sync::Arc;

use gateway::config::GatewayConfig;
use gateway::state::AppState;
use gateway::{broadcast, db, downsell, heartbeat, media, send_queue};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = GatewayConfig::from_env().expect("invalid gateway configuration");
    let upstream_base_url = env::var("UPSTREAM_BASE_URL").unwrap_or_else(|_| "https://api.telegram.org".to_owned());

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let state = Arc::new(AppState::new(pool, &config, upstream_base_url));

    tokio::spawn(send_queue::run_drain_loop(state.clone()));
    tokio::spawn(downsell::run_scan_loop(state.clone()));
    tokio::spawn(broadcast::run_drain_loop(state.clone()));
    tokio::spawn(state.media.clone().run_dispatch_loop());
    tokio::spawn(heartbeat::run_upstream_heartbeat_loop(state.clone()));
    tokio::spawn(heartbeat::run_db_heartbeat_loop(state.clone()));
    tokio::spawn(heartbeat::run_rate_limiter_gc_loop(state.clone()));

    let router = gateway::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.expect("failed to bind");
    info!(addr = %config.bind_addr, "gateway listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await.expect("gateway server error");
    info!("gateway shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}

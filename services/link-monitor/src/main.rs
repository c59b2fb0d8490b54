use std::sync::Arc;

use link_monitor::engine::{EngineConfig, MonitorEngine};
use link_monitor::server::{create_router, AppState, ServerConfig};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("Starting link-monitor service");

    let server_config = ServerConfig::from_env()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
    let engine = Arc::new(MonitorEngine::new(EngineConfig::default()));

    let state = AppState {
        engine,
        config: Arc::new(server_config.clone()),
    };
    let app = create_router(state);

    let listener = TcpListener::bind(&server_config.bind_addr).await?;
    tracing::info!("Listening on {}", server_config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

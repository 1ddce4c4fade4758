//! Rally notification API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use rally_common::config::AppConfig;
use rally_common::db;
use rally_notifier::dispatcher::{DispatchSettings, Dispatcher};
use rally_notifier::queue::NotificationQueue;
use rally_notifier::store::PgStore;
use rally_notifier::transport;

use rally_api::routes::create_router;
use rally_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("rally_api=debug,rally_notifier=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Rally notification API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to the notification store
    let pool = db::connect(&config).await?;

    // Build application state
    let queue = NotificationQueue::new(Arc::new(PgStore::new(pool)));
    let dispatcher = Dispatcher::new(
        queue.clone(),
        transport::from_config(&config)?,
        DispatchSettings::from_config(&config),
    );
    let state = AppState::new(queue, dispatcher);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr: SocketAddr = config
        .api_bind_addr
        .parse()
        .map_err(|_| anyhow::anyhow!("API_BIND_ADDR must be a socket address"))?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

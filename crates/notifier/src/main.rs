//! One-shot dispatch pass, meant to be run from cron or a job scheduler.
//!
//! Usage: `rally-dispatch [batch_size]`

use std::sync::Arc;

use rally_common::config::AppConfig;
use rally_common::db;
use rally_notifier::dispatcher::{DispatchSettings, Dispatcher};
use rally_notifier::queue::NotificationQueue;
use rally_notifier::store::PgStore;
use rally_notifier::transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rally_notifier=info".into()),
        )
        .json()
        .init();

    let batch_size = match std::env::args().nth(1) {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| anyhow::anyhow!("batch size must be a positive integer"))?,
        ),
        None => None,
    };

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to the notification store
    let pool = db::connect(&config).await?;

    let queue = NotificationQueue::new(Arc::new(PgStore::new(pool)));
    let dispatcher = Dispatcher::new(
        queue,
        transport::from_config(&config)?,
        DispatchSettings::from_config(&config),
    );

    let summary = dispatcher.run_pass_now(batch_size).await?;
    let summary = serde_json::to_string(&summary)?;
    tracing::info!(%summary, "Dispatch run finished");

    Ok(())
}

//! Trustplane control plane service binary

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trustplane_common::{SystemClock, VERSION};
use trustplane_controld::{router, AppState, Collaborators, ControlPlaneConfig};
use trustplane_moderation::InMemoryEntityStore;
use trustplane_tokens::TracingNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting Trustplane control plane v{}", VERSION);

    // Load configuration
    let config = ControlPlaneConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // No external stores are wired here; entity state and tokens live in memory
    let collaborators = Collaborators::in_memory(
        Arc::new(TracingNotifier),
        Arc::new(InMemoryEntityStore::new()),
    );
    let state = AppState::new(config, Arc::new(SystemClock), collaborators)?;
    info!(
        bucket_width_secs = state.config.metrics.bucket_width_secs,
        retention_days = state.config.metrics.retention_days,
        target_timeout_ms = state.config.moderation.target_timeout_ms,
        "Control plane initialized"
    );

    let background = state.start_background_tasks();
    let app = router(state.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("REST API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    for task in background {
        task.abort();
    }
    state.audit.flush();

    info!("Shutting down Trustplane control plane");
    Ok(())
}

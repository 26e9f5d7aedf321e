use std::sync::Arc;

use fortress_security::{app, build_state, config::AppConfig, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let state = build_state(config.clone());
    state.intel.spawn_refresh(config.intel_refresh_interval);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("fortress-security listening on {}", config.bind_addr);
    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown(state))
        .await?;
    Ok(())
}

async fn shutdown(state: Arc<AppState>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("shutdown signal received, cancelling in-flight analyzers");
    state.orchestrator.cancel_active_analyzers().await;
}

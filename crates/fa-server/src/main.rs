//! Flight assurance server - visibility and ground-risk analysis over HTTP

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fa_server::{api, config::Config, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("fa_server=debug".parse()?)
        .add_directive("fa_core=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting flight assurance server...");

    let port = config.server_port;
    let state = Arc::new(AppState::new(config));

    if state.config().population_dataset_path.is_some() {
        if let Err(err) = state.population().reload().await {
            tracing::warn!("Population dataset not loaded: {}", err);
        }
    }

    let app = api::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

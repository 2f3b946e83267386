//! # Passkey Ceremony Server
//!
//! Entry point: logging, configuration, state, then serve.

use passkey_ceremony::{app, config::Config, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_ceremony=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        rp_id = %config.rp_id,
        rp_origin = %config.rp_origin,
        database = %config.database_url,
        "configuration loaded"
    );

    // the pending-challenge sweep starts with the state
    let app_state = AppState::new(&config).await?;
    tracing::info!("application state initialized");

    let app = app(app_state, &config).await?;

    let bind_addr = config.bind_address();
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

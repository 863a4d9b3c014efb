//! # Comparable Vehicle API — Binary Entrypoint
//! Boots the Axum HTTP server: environment config, tracing, the PostgreSQL
//! listing store pool, and the router.
//!
//! ## Endpoints
//! - `GET /health` — liveness + store connectivity
//! - `GET /stats` — store statistics
//! - `GET /top-vehicles` — most-listed (make, model) pairs
//! - `GET /listings/{id}` — normalised listing payload
//! - `GET /listings/{id}/comparables` — ranked comparables with explanations
//!
//! See `README.md` for the environment variables.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use vehicle_comparables::{api, AppConfig, PgListingStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let port = config.port;

    let store = PgListingStore::connect(&config.db).await?;
    let state = api::AppState::new(Arc::new(store), config);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "comparable vehicle API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

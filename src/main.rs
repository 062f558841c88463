// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pace-Pipeline API Server
//!
//! Exposes the ingestion, enrichment, feature and model stages as task
//! endpoints for an external scheduler, plus a small read API.

use pace_pipeline::{config::Config, db::Database, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Pace-Pipeline API");

    // Open the store and bring the schema up to date
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("Database ready");

    let state = Arc::new(AppState::new(config.clone(), db)?);

    // Register the athlete behind a configured refresh token, if any
    if let Some(refresh_token) = config.bootstrap_refresh_token.as_deref() {
        match state.pipeline.register(refresh_token).await {
            Ok(athlete) => {
                tracing::info!(athlete_id = athlete.athlete_id, "Bootstrap athlete registered")
            }
            Err(e) => tracing::warn!(error = %e, "Bootstrap registration failed"),
        }
    }

    // Build router
    let app = pace_pipeline::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("pace_pipeline=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}

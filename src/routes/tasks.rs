// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task routes triggered by the external scheduler.
//!
//! Every route here sits behind `require_tasks_auth` (applied in
//! routes/mod.rs). Handlers run the stage synchronously and return its
//! report, so the scheduler sees the outcome in the response.

use crate::error::{AppError, Result};
use crate::models::Athlete;
use crate::services::{
    AthleteRunReport, EnrichmentReport, FeatureMode, FeatureReport, ModelReport, ModelScope,
    SyncReport,
};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Task routes (called by the scheduler).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/register", post(register))
        .route("/tasks/sync", post(sync))
        .route("/tasks/enrich", post(enrich))
        .route("/tasks/features", post(features))
        .route("/tasks/train", post(train))
        .route("/tasks/run", post(run_athlete))
        .route("/tasks/run-all", post(run_all))
        .route("/tasks/delete-athlete", post(delete_athlete))
}

/// Payload naming a single athlete.
#[derive(Debug, Deserialize)]
pub struct AthletePayload {
    pub athlete_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct FeaturesPayload {
    pub athlete_id: i64,
    #[serde(default)]
    pub mode: FeatureMode,
    /// Only activities starting at or before this instant are used
    pub as_of: Option<DateTime<Utc>>,
}

/// Training payload; omit `athlete_id` for a global model.
#[derive(Debug, Default, Deserialize)]
pub struct TrainPayload {
    pub athlete_id: Option<i64>,
}

impl TrainPayload {
    fn scope(&self) -> ModelScope {
        self.athlete_id
            .map_or(ModelScope::Global, ModelScope::Athlete)
    }
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterPayload>,
) -> Result<Json<Athlete>> {
    let refresh_token = payload.refresh_token.trim();
    if refresh_token.is_empty() {
        return Err(AppError::BadRequest("refresh_token is empty".to_string()));
    }

    let athlete = state.pipeline.register(refresh_token).await?;
    tracing::info!(athlete_id = athlete.athlete_id, "Athlete registered");
    Ok(Json(athlete))
}

async fn sync(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AthletePayload>,
) -> Result<Json<SyncReport>> {
    Ok(Json(state.pipeline.sync(payload.athlete_id).await?))
}

async fn enrich(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AthletePayload>,
) -> Result<Json<EnrichmentReport>> {
    Ok(Json(state.pipeline.enrich(payload.athlete_id).await?))
}

async fn features(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FeaturesPayload>,
) -> Result<Json<FeatureReport>> {
    let report = state
        .pipeline
        .compute_features(payload.athlete_id, payload.mode, payload.as_of)
        .await?;
    Ok(Json(report))
}

async fn train(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<TrainPayload>>,
) -> Result<Json<ModelReport>> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    Ok(Json(state.pipeline.train(payload.scope()).await?))
}

/// Run `sync → enrich → features` for one athlete.
///
/// Returns 500 with the report body when a stage failed, so the scheduler
/// retries the run.
async fn run_athlete(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AthletePayload>,
) -> (StatusCode, Json<AthleteRunReport>) {
    let report = state.pipeline.run_athlete(payload.athlete_id).await;
    let status = if report.succeeded() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report))
}

#[derive(Debug, Serialize)]
pub struct RunAllResponse {
    pub athletes: usize,
    pub failed: usize,
    pub reports: Vec<AthleteRunReport>,
}

/// Run every registered athlete. Per-athlete failures are reported, not
/// escalated.
async fn run_all(State(state): State<Arc<AppState>>) -> Result<Json<RunAllResponse>> {
    let reports = state.pipeline.run_all().await?;
    Ok(Json(RunAllResponse {
        athletes: reports.len(),
        failed: reports.iter().filter(|r| !r.succeeded()).count(),
        reports,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteAthleteResponse {
    pub athlete_id: i64,
    pub rows_deleted: u64,
}

async fn delete_athlete(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AthletePayload>,
) -> Result<Json<DeleteAthleteResponse>> {
    let rows_deleted = state.pipeline.delete_athlete(payload.athlete_id).await?;
    tracing::info!(
        athlete_id = payload.athlete_id,
        rows_deleted,
        "Athlete data deleted"
    );
    Ok(Json(DeleteAthleteResponse {
        athlete_id: payload.athlete_id,
        rows_deleted,
    }))
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read-only API over pipeline results.

use crate::error::{AppError, Result};
use crate::models::cursor::{KEY_AFTER, SOURCE_ACTIVITIES};
use crate::models::{Athlete, EnrichmentCounts, Prediction};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API routes. The scheduler token guard is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/athletes/{athlete_id}/status", get(get_status))
        .route("/api/athletes/{athlete_id}/predictions", get(get_predictions))
}

async fn require_athlete(state: &AppState, athlete_id: i64) -> Result<Athlete> {
    state
        .db
        .get_athlete(athlete_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Athlete {} not found", athlete_id)))
}

// ─── Status ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AthleteStatusResponse {
    pub athlete: Athlete,
    pub has_tokens: bool,
    /// Current `after` cursor (epoch seconds), if synced at least once
    pub cursor_after: Option<String>,
    pub cursor_updated_at: Option<String>,
    pub activities: i64,
    pub enrichment: EnrichmentCounts,
    pub latest_feature_start: Option<String>,
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<i64>,
) -> Result<Json<AthleteStatusResponse>> {
    let athlete = require_athlete(&state, athlete_id).await?;

    let has_tokens = state.db.get_tokens(athlete_id).await?.is_some();
    let cursor = state
        .db
        .get_cursor(athlete_id, SOURCE_ACTIVITIES, KEY_AFTER)
        .await?;
    let activities = state.db.count_activities(athlete_id).await?;
    let enrichment = state.db.enrichment_counts(athlete_id).await?;
    let latest_feature_start = state.db.latest_feature_start(athlete_id).await?;

    Ok(Json(AthleteStatusResponse {
        athlete,
        has_tokens,
        cursor_after: cursor.as_ref().map(|c| c.value.clone()),
        cursor_updated_at: cursor.map(|c| format_utc_rfc3339(c.updated_at)),
        activities,
        enrichment,
        latest_feature_start: latest_feature_start.map(format_utc_rfc3339),
    }))
}

// ─── Predictions ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PredictionsQuery {
    pub model_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionsResponse {
    pub athlete_id: i64,
    pub predictions: Vec<Prediction>,
}

async fn get_predictions(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<i64>,
    Query(query): Query<PredictionsQuery>,
) -> Result<Json<PredictionsResponse>> {
    require_athlete(&state, athlete_id).await?;

    let predictions = state
        .db
        .list_predictions(athlete_id, query.model_version.as_deref())
        .await?;

    Ok(Json(PredictionsResponse {
        athlete_id,
        predictions,
    }))
}

//! Model predictions.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Prediction type for per-activity pace.
pub const PREDICTION_TYPE_PACE: &str = "pace";

/// One row of `model_predictions`.
///
/// Unique on `(athlete_id, activity_id, prediction_type, model_version)`;
/// re-running a model version overwrites its rows.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Prediction {
    pub athlete_id: i64,
    pub activity_id: i64,
    pub prediction_type: String,
    pub model_name: String,
    pub model_version: String,
    pub predicted_pace_s_per_km: f64,
    /// Pace scaled by the activity distance, when known
    pub predicted_time_s: Option<f64>,
    /// Inputs the prediction was made from, as a JSON object
    pub features_json: String,
    pub created_at: DateTime<Utc>,
}

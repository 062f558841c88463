// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava activity model for storage and the ingestion boundary.
//!
//! Upstream payloads are parsed here and nowhere else; the verbatim JSON is
//! kept on the row as an opaque [`RawPayload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::time_utils::parse_utc;

/// Which upstream endpoint produced a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Item from the paginated activity list
    Summary,
    /// Detailed activity response
    Detail,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Summary => "summary",
            PayloadKind::Detail => "detail",
        }
    }
}

/// Verbatim upstream payload, retained for forward-compatibility.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub kind: PayloadKind,
    pub json: String,
}

/// Summary metrics shared by list items and detail responses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityMetrics {
    pub name: Option<String>,
    pub sport_type: Option<String>,
    pub timezone: Option<String>,
    pub elapsed_time_s: Option<i64>,
    pub moving_time_s: Option<i64>,
    pub distance_m: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    pub average_speed_mps: Option<f64>,
    pub max_speed_mps: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub average_watts: Option<f64>,
    pub max_watts: Option<f64>,
    pub average_cadence: Option<f64>,
    pub trainer: Option<bool>,
    pub commute: Option<bool>,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
}

/// An activity parsed from an upstream payload, ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub activity_id: i64,
    pub athlete_id: i64,
    pub start_date: DateTime<Utc>,
    pub metrics: ActivityMetrics,
    pub raw: RawPayload,
}

impl ActivityRecord {
    /// Parse a Strava activity payload (list item or detail).
    ///
    /// Fails with `UpstreamData` when the identity or start date is missing.
    pub fn from_payload(
        athlete_id: i64,
        payload: &Value,
        kind: PayloadKind,
    ) -> Result<Self, AppError> {
        let activity_id = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::UpstreamData("activity payload has no id".to_string()))?;

        let start_date = payload
            .get("start_date")
            .and_then(Value::as_str)
            .and_then(parse_utc)
            .ok_or_else(|| {
                AppError::UpstreamData(format!(
                    "activity {} has no valid start_date",
                    activity_id
                ))
            })?;

        // start_latlng is `[lat, lng]` or an empty array for indoor activities
        let latlng = payload.get("start_latlng").and_then(Value::as_array);
        let coord = |i: usize| latlng.and_then(|a| a.get(i)).and_then(Value::as_f64);

        let metrics = ActivityMetrics {
            name: str_field(payload, "name"),
            sport_type: str_field(payload, "sport_type").or_else(|| str_field(payload, "type")),
            timezone: str_field(payload, "timezone"),
            elapsed_time_s: payload.get("elapsed_time").and_then(Value::as_i64),
            moving_time_s: payload.get("moving_time").and_then(Value::as_i64),
            distance_m: f64_field(payload, "distance"),
            elevation_gain_m: f64_field(payload, "total_elevation_gain"),
            average_speed_mps: f64_field(payload, "average_speed"),
            max_speed_mps: f64_field(payload, "max_speed"),
            average_heartrate: f64_field(payload, "average_heartrate"),
            max_heartrate: f64_field(payload, "max_heartrate"),
            average_watts: f64_field(payload, "average_watts"),
            max_watts: f64_field(payload, "max_watts"),
            average_cadence: f64_field(payload, "average_cadence"),
            trainer: payload.get("trainer").and_then(Value::as_bool),
            commute: payload.get("commute").and_then(Value::as_bool),
            start_lat: coord(0),
            start_lng: coord(1),
        };

        Ok(Self {
            activity_id,
            athlete_id,
            start_date,
            metrics,
            raw: RawPayload {
                kind,
                json: payload.to_string(),
            },
        })
    }
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(String::from)
}

fn f64_field(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

/// Stored activity row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    /// Strava activity ID (primary key)
    pub activity_id: i64,
    /// Strava athlete ID (owner)
    pub athlete_id: i64,
    pub name: Option<String>,
    /// Sport type (Run, TrailRun, Ride, ...)
    pub sport_type: Option<String>,
    pub start_date: DateTime<Utc>,
    pub timezone: Option<String>,
    pub elapsed_time_s: Option<i64>,
    pub moving_time_s: Option<i64>,
    pub distance_m: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    pub average_speed_mps: Option<f64>,
    pub max_speed_mps: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub average_watts: Option<f64>,
    pub max_watts: Option<f64>,
    pub average_cadence: Option<f64>,
    pub trainer: Option<bool>,
    pub commute: Option<bool>,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    /// "summary" or "detail"
    pub raw_kind: String,
    #[serde(skip)]
    pub raw_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

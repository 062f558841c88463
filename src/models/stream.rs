//! Activity time-series streams.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;

/// One stored stream, keyed by `(activity_id, stream_type, resolution)`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ActivityStream {
    pub activity_id: i64,
    /// e.g. "heartrate", "altitude", "time"
    pub stream_type: String,
    /// "low", "medium" or "high"
    pub resolution: String,
    /// "time" or "distance"
    pub series_type: Option<String>,
    pub original_size: Option<i64>,
    /// Raw series as a JSON array
    #[serde(skip)]
    pub data_json: String,
    pub fetched_at: DateTime<Utc>,
}

/// Parse a `key_by_type=true` streams response into rows.
///
/// Strava omits stream types the activity has no data for; those are simply
/// absent from the result. Every present entry must carry a `data` array.
pub fn parse_streams(
    activity_id: i64,
    payload: &Value,
    requested_resolution: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<ActivityStream>, AppError> {
    let entries = payload.as_object().ok_or_else(|| {
        AppError::UpstreamData(format!(
            "streams for activity {} are not keyed by type",
            activity_id
        ))
    })?;

    let mut streams = Vec::with_capacity(entries.len());
    for (stream_type, entry) in entries {
        let data = entry
            .get("data")
            .filter(|d| d.is_array())
            .ok_or_else(|| {
                AppError::UpstreamData(format!(
                    "stream {} of activity {} has no data array",
                    stream_type, activity_id
                ))
            })?;

        streams.push(ActivityStream {
            activity_id,
            stream_type: stream_type.clone(),
            resolution: entry
                .get("resolution")
                .and_then(Value::as_str)
                .unwrap_or(requested_resolution)
                .to_string(),
            series_type: entry
                .get("series_type")
                .and_then(Value::as_str)
                .map(String::from),
            original_size: entry.get("original_size").and_then(Value::as_i64),
            data_json: data.to_string(),
            fetched_at,
        });
    }

    // Deterministic write order
    streams.sort_by(|a, b| a.stream_type.cmp(&b.stream_type));
    Ok(streams)
}

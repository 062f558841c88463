// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Derived per-activity feature rows and the model input vector.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Names of the model inputs, in the order of [`FeatureRow::model_inputs`].
pub const MODEL_INPUT_NAMES: [&str; MODEL_INPUT_COUNT] = [
    "distance_m",
    "elevation_gain_m",
    "dist_7d_m",
    "elev_7d_m",
    "time_7d_s",
    "dist_28d_m",
    "elev_28d_m",
    "time_28d_s",
    "elev_density_m_per_m",
    "load_ratio_dist_7_28",
    "load_ratio_elev_7_28",
    "load_ratio_time_7_28",
    "log_distance_m",
    "log_elev_gain_m",
];

pub const MODEL_INPUT_COUNT: usize = 14;

/// Sport types the pace model trains on.
pub const RUN_SPORT_TYPES: [&str; 3] = ["Run", "TrailRun", "VirtualRun"];

/// One row of `activity_features`, fully derived from activities.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct FeatureRow {
    pub activity_id: i64,
    pub athlete_id: i64,
    pub start_date: DateTime<Utc>,
    pub sport_type: Option<String>,
    pub moving_time_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    /// Target: moving seconds per kilometre
    pub pace_s_per_km: Option<f64>,
    pub elev_m_per_km: Option<f64>,
    pub avg_hr: Option<f64>,
    pub max_hr: Option<f64>,
    pub avg_watts: Option<f64>,
    pub max_watts: Option<f64>,
    pub hr_x_time: Option<f64>,
    pub dist_7d_m: Option<f64>,
    pub elev_7d_m: Option<f64>,
    pub time_7d_s: Option<f64>,
    pub dist_28d_m: Option<f64>,
    pub elev_28d_m: Option<f64>,
    pub time_28d_s: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl FeatureRow {
    pub fn is_run(&self) -> bool {
        self.sport_type
            .as_deref()
            .is_some_and(|s| RUN_SPORT_TYPES.contains(&s))
    }

    /// Model input vector, or `None` if any input is undefined.
    ///
    /// Ratios and elevation density are undefined when their denominator is
    /// zero, which drops the row from training.
    pub fn model_inputs(&self) -> Option<[f64; MODEL_INPUT_COUNT]> {
        let distance = self.distance_m?;
        let elevation = self.elevation_gain_m?;
        let dist_7d = self.dist_7d_m?;
        let elev_7d = self.elev_7d_m?;
        let time_7d = self.time_7d_s?;
        let dist_28d = self.dist_28d_m?;
        let elev_28d = self.elev_28d_m?;
        let time_28d = self.time_28d_s?;

        let inputs = [
            distance,
            elevation,
            dist_7d,
            elev_7d,
            time_7d,
            dist_28d,
            elev_28d,
            time_28d,
            ratio(elevation, distance)?,
            ratio(dist_7d, dist_28d)?,
            ratio(elev_7d, elev_28d)?,
            ratio(time_7d, time_28d)?,
            ln_plus_one(distance),
            ln_plus_one(elevation),
        ];

        inputs.iter().all(|v| v.is_finite()).then_some(inputs)
    }

    /// Training target, when defined and usable.
    pub fn target(&self) -> Option<f64> {
        self.pace_s_per_km.filter(|p| p.is_finite() && *p > 0.0)
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

// Non-positive values count as zero
fn ln_plus_one(value: f64) -> f64 {
    (value.max(0.0) + 1.0).ln()
}

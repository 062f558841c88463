// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leakage-safe rolling features.
//!
//! Rows are derived by one ordered scan over an athlete's activities. For an
//! activity starting at `t`, a window of span `w` covers every activity with
//! start in `[t - w, t]`, including others that share the exact instant `t`,
//! and never anything that starts later.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::AppError;
use crate::models::{Activity, FeatureRow};

/// How much of the feature table to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMode {
    /// Replace every row for the athlete
    Full,
    /// Rewrite rows from the earliest new or changed activity onwards
    #[default]
    Incremental,
}

/// Result of one feature computation.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureReport {
    pub athlete_id: i64,
    pub mode: FeatureMode,
    pub as_of: Option<DateTime<Utc>>,
    pub activities_scanned: u32,
    pub rows_written: u32,
}

/// Running sum over a trailing time window.
///
/// Values must be observed in non-decreasing time order. Missing values are
/// ignored; the sum is `None` while no value in the window is present.
#[derive(Debug, Clone)]
pub struct WindowSum {
    span: Duration,
    entries: VecDeque<(DateTime<Utc>, Option<f64>)>,
    sum: f64,
    present: usize,
}

impl WindowSum {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            entries: VecDeque::new(),
            sum: 0.0,
            present: 0,
        }
    }

    /// Add a value observed at `at`.
    pub fn observe(&mut self, at: DateTime<Utc>, value: Option<f64>) -> Result<(), AppError> {
        if let Some((last, _)) = self.entries.back() {
            if at < *last {
                return Err(AppError::LeakageViolation(format!(
                    "observation at {} arrived after {}",
                    at, last
                )));
            }
        }

        if let Some(v) = value {
            self.sum += v;
            self.present += 1;
        }
        self.entries.push_back((at, value));
        Ok(())
    }

    /// Sum over `[at - span, at]`.
    ///
    /// Evicts older entries, so `at` must not decrease between calls. Fails
    /// if the window holds anything from after `at`.
    pub fn total_at(&mut self, at: DateTime<Utc>) -> Result<Option<f64>, AppError> {
        if let Some((last, _)) = self.entries.back() {
            if *last > at {
                return Err(AppError::LeakageViolation(format!(
                    "window for {} contains data from {}",
                    at, last
                )));
            }
        }

        let start = at - self.span;
        while let Some((t, value)) = self.entries.front() {
            if *t >= start {
                break;
            }
            if let Some(v) = value {
                self.sum -= v;
                self.present -= 1;
            }
            self.entries.pop_front();
        }

        if self.present == 0 {
            // Drop accumulated rounding once the window is empty
            self.sum = 0.0;
            return Ok(None);
        }
        Ok(Some(self.sum))
    }
}

/// The 7- and 28-day windows for distance, elevation and time.
struct LoadWindows {
    dist: WindowSum,
    elev: WindowSum,
    time: WindowSum,
}

impl LoadWindows {
    fn new(days: i64) -> Self {
        let span = Duration::days(days);
        Self {
            dist: WindowSum::new(span),
            elev: WindowSum::new(span),
            time: WindowSum::new(span),
        }
    }

    fn observe(&mut self, a: &Activity) -> Result<(), AppError> {
        self.dist.observe(a.start_date, a.distance_m)?;
        self.elev.observe(a.start_date, a.elevation_gain_m)?;
        self.time
            .observe(a.start_date, a.moving_time_s.map(|t| t as f64))
    }

    fn totals_at(
        &mut self,
        at: DateTime<Utc>,
    ) -> Result<(Option<f64>, Option<f64>, Option<f64>), AppError> {
        Ok((
            self.dist.total_at(at)?,
            self.elev.total_at(at)?,
            self.time.total_at(at)?,
        ))
    }
}

/// Build feature rows from activities sorted by `(start_date, activity_id)`.
///
/// Deterministic: the same input always yields the same rows (apart from
/// `computed_at`). Out-of-order input fails with `LeakageViolation`.
pub fn build_feature_rows(
    activities: &[Activity],
    computed_at: DateTime<Utc>,
) -> Result<Vec<FeatureRow>, AppError> {
    let mut week = LoadWindows::new(7);
    let mut month = LoadWindows::new(28);
    let mut rows = Vec::with_capacity(activities.len());

    let mut i = 0;
    while i < activities.len() {
        let t = activities[i].start_date;

        // Peers sharing the instant `t` all see each other
        let mut j = i;
        while j < activities.len() && activities[j].start_date == t {
            week.observe(&activities[j])?;
            month.observe(&activities[j])?;
            j += 1;
        }
        if let Some(next) = activities.get(j) {
            if next.start_date < t {
                return Err(AppError::LeakageViolation(format!(
                    "activity {} at {} is out of order after {}",
                    next.activity_id, next.start_date, t
                )));
            }
        }

        let (dist_7d, elev_7d, time_7d) = week.totals_at(t)?;
        let (dist_28d, elev_28d, time_28d) = month.totals_at(t)?;

        for a in &activities[i..j] {
            rows.push(FeatureRow {
                dist_7d_m: dist_7d,
                elev_7d_m: elev_7d,
                time_7d_s: time_7d,
                dist_28d_m: dist_28d,
                elev_28d_m: elev_28d,
                time_28d_s: time_28d,
                ..base_row(a, computed_at)
            });
        }
        i = j;
    }

    Ok(rows)
}

/// Per-activity (non-window) features.
fn base_row(a: &Activity, computed_at: DateTime<Utc>) -> FeatureRow {
    let moving = a.moving_time_s.map(|t| t as f64);
    let km = a.distance_m.filter(|d| *d > 0.0).map(|d| d / 1000.0);

    FeatureRow {
        activity_id: a.activity_id,
        athlete_id: a.athlete_id,
        start_date: a.start_date,
        sport_type: a.sport_type.clone(),
        moving_time_s: moving,
        distance_m: a.distance_m,
        elevation_gain_m: a.elevation_gain_m,
        pace_s_per_km: km.zip(moving).map(|(km, t)| t / km),
        elev_m_per_km: km.zip(a.elevation_gain_m).map(|(km, e)| e / km),
        avg_hr: a.average_heartrate,
        max_hr: a.max_heartrate,
        avg_watts: a.average_watts,
        max_watts: a.max_watts,
        hr_x_time: a.average_heartrate.zip(moving).map(|(hr, t)| hr * t),
        dist_7d_m: None,
        elev_7d_m: None,
        time_7d_s: None,
        dist_28d_m: None,
        elev_28d_m: None,
        time_28d_s: None,
        computed_at,
    }
}

/// Computes and stores feature rows.
#[derive(Clone)]
pub struct FeatureAggregator {
    db: Database,
}

impl FeatureAggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Recompute the athlete's features, using only activities that started
    /// at or before `as_of` when given.
    pub async fn compute_features(
        &self,
        athlete_id: i64,
        mode: FeatureMode,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<FeatureReport, AppError> {
        let activities = self.db.list_activities(athlete_id, as_of).await?;
        let rows = build_feature_rows(&activities, Utc::now())?;

        let rows_written = match mode {
            FeatureMode::Full => {
                self.db.replace_features(athlete_id, &rows).await?;
                rows.len()
            }
            FeatureMode::Incremental => {
                let computed = self.db.feature_computed_at(athlete_id).await?;
                // First activity with no row yet, or changed since its row was
                // computed. Rows from there on may see it in their windows.
                let dirty_from = activities
                    .iter()
                    .find(|a| {
                        computed
                            .get(&a.activity_id)
                            .map_or(true, |at| a.updated_at > *at)
                    })
                    .map(|a| a.start_date);

                let fresh: Vec<FeatureRow> = match dirty_from {
                    Some(from) => rows.into_iter().filter(|r| r.start_date >= from).collect(),
                    None => Vec::new(),
                };
                self.db.upsert_features(&fresh).await?;
                fresh.len()
            }
        };

        tracing::info!(
            athlete_id,
            mode = ?mode,
            as_of = ?as_of,
            scanned = activities.len(),
            written = rows_written,
            "Features computed"
        );

        Ok(FeatureReport {
            athlete_id,
            mode,
            as_of,
            activities_scanned: activities.len() as u32,
            rows_written: rows_written as u32,
        })
    }
}

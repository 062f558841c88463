// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Temporal split and pace model runner.
//!
//! Feature rows are ordered by start date and split chronologically: the
//! oldest 80% train, the rest evaluate. Evaluation rows are never seen by
//! `fit`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::Database;
use crate::error::AppError;
use crate::models::features::{MODEL_INPUT_COUNT, MODEL_INPUT_NAMES};
use crate::models::prediction::PREDICTION_TYPE_PACE;
use crate::models::{FeatureRow, Prediction};

/// One model input vector.
pub type Inputs = [f64; MODEL_INPUT_COUNT];

/// Fraction of rows used for training.
pub const TRAIN_FRACTION: f64 = 0.8;

/// Index splitting `n` chronologically ordered rows into train/eval.
///
/// Always leaves at least one training row.
pub fn temporal_split(n: usize) -> usize {
    ((n as f64 * TRAIN_FRACTION).floor() as usize).max(1)
}

/// A pluggable regression model.
pub trait Regressor: Send {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &[Inputs], y: &[f64]) -> Result<(), AppError>;

    fn predict(&self, x: &Inputs) -> Result<f64, AppError>;
}

fn not_fitted(name: &str) -> AppError {
    AppError::Internal(anyhow::anyhow!("{} used before fit", name))
}

/// Predicts the historical mean pace of the training rows.
#[derive(Debug, Default, Clone)]
pub struct MeanPaceBaseline {
    mean: Option<f64>,
}

impl Regressor for MeanPaceBaseline {
    fn name(&self) -> &'static str {
        "mean_pace_baseline"
    }

    fn fit(&mut self, _x: &[Inputs], y: &[f64]) -> Result<(), AppError> {
        if y.is_empty() {
            return Err(AppError::BadRequest("no training rows".to_string()));
        }
        self.mean = Some(y.iter().sum::<f64>() / y.len() as f64);
        Ok(())
    }

    fn predict(&self, _x: &Inputs) -> Result<f64, AppError> {
        self.mean.ok_or_else(|| not_fitted(self.name()))
    }
}

/// Ridge regression on standardized inputs, solved in closed form.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    lambda: f64,
    fitted: Option<RidgeFit>,
}

#[derive(Debug, Clone)]
struct RidgeFit {
    means: Inputs,
    scales: Inputs,
    weights: Inputs,
    intercept: f64,
}

impl RidgeRegression {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            fitted: None,
        }
    }
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Regressor for RidgeRegression {
    fn name(&self) -> &'static str {
        "ridge_regression"
    }

    fn fit(&mut self, x: &[Inputs], y: &[f64]) -> Result<(), AppError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(AppError::BadRequest(format!(
                "cannot fit on {} inputs and {} targets",
                x.len(),
                y.len()
            )));
        }
        let n = x.len() as f64;
        const K: usize = MODEL_INPUT_COUNT;

        let mut means = [0.0; K];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }

        let mut scales = [0.0; K];
        for row in x {
            for j in 0..K {
                scales[j] += (row[j] - means[j]).powi(2) / n;
            }
        }
        // Constant columns standardize to zero and get no weight
        for s in scales.iter_mut() {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }

        let y_mean = y.iter().sum::<f64>() / n;

        // Normal equations: (ZᵀZ + λI) w = Zᵀ(y - ȳ)
        let mut a = [[0.0; K]; K];
        let mut b = [0.0; K];
        for (row, target) in x.iter().zip(y) {
            let mut z = [0.0; K];
            for j in 0..K {
                z[j] = (row[j] - means[j]) / scales[j];
            }
            for j in 0..K {
                b[j] += z[j] * (target - y_mean);
                for k in 0..K {
                    a[j][k] += z[j] * z[k];
                }
            }
        }
        for (j, row) in a.iter_mut().enumerate() {
            row[j] += self.lambda;
        }

        let weights = solve(a, b)?;
        self.fitted = Some(RidgeFit {
            means,
            scales,
            weights,
            intercept: y_mean,
        });
        Ok(())
    }

    fn predict(&self, x: &Inputs) -> Result<f64, AppError> {
        let fit = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let mut y = fit.intercept;
        for j in 0..MODEL_INPUT_COUNT {
            y += fit.weights[j] * (x[j] - fit.means[j]) / fit.scales[j];
        }
        Ok(y)
    }
}

/// Solve `a · w = b` by Gaussian elimination with partial pivoting.
fn solve<const K: usize>(mut a: [[f64; K]; K], mut b: [f64; K]) -> Result<[f64; K], AppError> {
    for col in 0..K {
        let pivot = (col..K)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(AppError::Internal(anyhow::anyhow!(
                "singular system in column {}",
                col
            )));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..K {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..K {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut w = [0.0; K];
    for row in (0..K).rev() {
        let tail: f64 = (row + 1..K).map(|k| a[row][k] * w[k]).sum();
        w[row] = (b[row] - tail) / a[row][row];
    }
    Ok(w)
}

/// Which feature rows a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "athlete_id")]
pub enum ModelScope {
    Athlete(i64),
    Global,
}

impl ModelScope {
    fn athlete_id(self) -> Option<i64> {
        match self {
            ModelScope::Athlete(id) => Some(id),
            ModelScope::Global => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub mae: f64,
    pub rmse: f64,
}

impl ErrorMetrics {
    fn compute(predicted: &[f64], actual: &[f64]) -> Option<Self> {
        if predicted.is_empty() {
            return None;
        }
        let n = predicted.len() as f64;
        let (abs, sq) = predicted
            .iter()
            .zip(actual)
            .fold((0.0, 0.0), |(abs, sq), (p, a)| {
                (abs + (p - a).abs(), sq + (p - a).powi(2))
            });
        Some(Self {
            mae: abs / n,
            rmse: (sq / n).sqrt(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ok,
    InsufficientData,
}

/// Result of one model run.
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub scope: ModelScope,
    pub status: ModelStatus,
    pub model_name: String,
    pub model_version: String,
    /// Feature rows that qualified for training
    pub rows_usable: u32,
    pub rows_train: u32,
    pub rows_eval: u32,
    pub train_end: Option<DateTime<Utc>>,
    pub eval_start: Option<DateTime<Utc>>,
    pub metrics: Option<ErrorMetrics>,
    pub baseline_metrics: Option<ErrorMetrics>,
    pub predictions_written: u32,
}

/// Runs the temporal split, fits, evaluates and stores predictions.
#[derive(Clone)]
pub struct ModelRunner {
    db: Database,
    model_version: String,
}

impl ModelRunner {
    pub fn new(db: Database, model_version: String) -> Self {
        Self { db, model_version }
    }

    /// Run the default regressor.
    pub async fn run(&self, scope: ModelScope) -> Result<ModelReport, AppError> {
        self.run_with(scope, &mut RidgeRegression::default()).await
    }

    /// Run with a caller-supplied regressor.
    pub async fn run_with(
        &self,
        scope: ModelScope,
        regressor: &mut dyn Regressor,
    ) -> Result<ModelReport, AppError> {
        let rows = self.db.list_features(scope.athlete_id()).await?;

        let mut usable: Vec<(FeatureRow, Inputs, f64)> = rows
            .into_iter()
            .filter(FeatureRow::is_run)
            .filter_map(|row| {
                let inputs = row.model_inputs()?;
                let target = row.target()?;
                Some((row, inputs, target))
            })
            .collect();
        usable.sort_by(|a, b| {
            a.0.start_date
                .cmp(&b.0.start_date)
                .then(a.0.athlete_id.cmp(&b.0.athlete_id))
                .then(a.0.activity_id.cmp(&b.0.activity_id))
        });

        let mut report = ModelReport {
            scope,
            status: ModelStatus::InsufficientData,
            model_name: regressor.name().to_string(),
            model_version: self.model_version.clone(),
            rows_usable: usable.len() as u32,
            rows_train: 0,
            rows_eval: 0,
            train_end: None,
            eval_start: None,
            metrics: None,
            baseline_metrics: None,
            predictions_written: 0,
        };

        if usable.len() < 2 {
            tracing::info!(scope = ?scope, rows = usable.len(), "Not enough rows to train");
            return Ok(report);
        }

        let split = temporal_split(usable.len());
        let (train, eval) = usable.split_at(split);

        report.train_end = train.last().map(|(r, _, _)| r.start_date);
        report.eval_start = eval.first().map(|(r, _, _)| r.start_date);
        if let (Some(end), Some(start)) = (report.train_end, report.eval_start) {
            if end > start {
                return Err(AppError::LeakageViolation(format!(
                    "training ends at {} after evaluation starts at {}",
                    end, start
                )));
            }
        }

        let train_x: Vec<Inputs> = train.iter().map(|(_, x, _)| *x).collect();
        let train_y: Vec<f64> = train.iter().map(|(_, _, y)| *y).collect();
        regressor.fit(&train_x, &train_y)?;

        let mut baseline = MeanPaceBaseline::default();
        baseline.fit(&train_x, &train_y)?;

        let now = Utc::now();
        let mut predicted = Vec::with_capacity(eval.len());
        let mut baseline_predicted = Vec::with_capacity(eval.len());
        let mut actual = Vec::with_capacity(eval.len());
        let mut predictions = Vec::with_capacity(eval.len());

        for (row, inputs, target) in eval {
            let pace = regressor.predict(inputs)?;
            predicted.push(pace);
            baseline_predicted.push(baseline.predict(inputs)?);
            actual.push(*target);

            predictions.push(Prediction {
                athlete_id: row.athlete_id,
                activity_id: row.activity_id,
                prediction_type: PREDICTION_TYPE_PACE.to_string(),
                model_name: regressor.name().to_string(),
                model_version: self.model_version.clone(),
                predicted_pace_s_per_km: pace,
                predicted_time_s: row.distance_m.map(|d| pace * d / 1000.0),
                features_json: snapshot(inputs).to_string(),
                created_at: now,
            });
        }

        self.db.upsert_predictions(&predictions).await?;

        report.status = ModelStatus::Ok;
        report.rows_train = train.len() as u32;
        report.rows_eval = eval.len() as u32;
        report.metrics = ErrorMetrics::compute(&predicted, &actual);
        report.baseline_metrics = ErrorMetrics::compute(&baseline_predicted, &actual);
        report.predictions_written = predictions.len() as u32;

        tracing::info!(
            scope = ?scope,
            model = %report.model_name,
            version = %self.model_version,
            train = report.rows_train,
            eval = report.rows_eval,
            mae = report.metrics.map(|m| m.mae),
            baseline_mae = report.baseline_metrics.map(|m| m.mae),
            "Model run finished"
        );

        Ok(report)
    }
}

/// Named inputs as a JSON object.
fn snapshot(inputs: &Inputs) -> Value {
    let map: Map<String, Value> = MODEL_INPUT_NAMES
        .iter()
        .zip(inputs)
        .map(|(name, v)| (name.to_string(), Value::from(*v)))
        .collect();
    Value::Object(map)
}

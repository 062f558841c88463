// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stage runner.
//!
//! Stages for one athlete run one at a time (guarded by a per-athlete lock);
//! different athletes run in parallel with no shared locking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::models::Athlete;
use crate::services::enrichment::{EnrichmentOrchestrator, EnrichmentReport};
use crate::services::features::{FeatureAggregator, FeatureMode, FeatureReport};
use crate::services::ingest::{ActivityIngestor, SyncReport};
use crate::services::model::{ModelReport, ModelRunner, ModelScope};
use crate::services::tokens::TokenStore;

/// Outcome of one stage within a multi-stage run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed(T),
    /// `partial` holds what the stage committed before the error, if the
    /// stage keeps such counts
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial: Option<T>,
    },
    /// Not run because an earlier stage failed
    Skipped,
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// Per-athlete result of `sync → enrich → features`.
#[derive(Debug, Clone, Serialize)]
pub struct AthleteRunReport {
    pub athlete_id: i64,
    pub sync: StageOutcome<SyncReport>,
    pub enrich: StageOutcome<EnrichmentReport>,
    pub features: StageOutcome<FeatureReport>,
}

impl AthleteRunReport {
    pub fn succeeded(&self) -> bool {
        self.sync.is_completed() && self.enrich.is_completed() && self.features.is_completed()
    }
}

/// Entry point for every pipeline stage.
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    tokens: TokenStore,
    ingestor: ActivityIngestor,
    enricher: EnrichmentOrchestrator,
    features: FeatureAggregator,
    model: ModelRunner,
    max_concurrent_athletes: usize,
    athlete_locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(config: &Config, db: Database, tokens: TokenStore) -> Self {
        Self {
            ingestor: ActivityIngestor::new(config, db.clone(), tokens.clone()),
            enricher: EnrichmentOrchestrator::new(config, db.clone(), tokens.clone()),
            features: FeatureAggregator::new(db.clone()),
            model: ModelRunner::new(db.clone(), config.model_version.clone()),
            max_concurrent_athletes: config.max_concurrent_athletes.max(1),
            athlete_locks: Arc::new(DashMap::new()),
            db,
            tokens,
        }
    }

    pub fn model(&self) -> &ModelRunner {
        &self.model
    }

    fn athlete_lock(&self, athlete_id: i64) -> Arc<Mutex<()>> {
        self.athlete_locks
            .entry(athlete_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn register(&self, refresh_token: &str) -> Result<Athlete, AppError> {
        self.tokens.register(refresh_token).await
    }

    pub async fn sync(&self, athlete_id: i64) -> Result<SyncReport, AppError> {
        let lock = self.athlete_lock(athlete_id);
        let _guard = lock.lock().await;
        self.ingestor.sync_activities(athlete_id).await
    }

    pub async fn enrich(&self, athlete_id: i64) -> Result<EnrichmentReport, AppError> {
        let lock = self.athlete_lock(athlete_id);
        let _guard = lock.lock().await;
        self.enricher.enrich(athlete_id).await
    }

    pub async fn compute_features(
        &self,
        athlete_id: i64,
        mode: FeatureMode,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<FeatureReport, AppError> {
        let lock = self.athlete_lock(athlete_id);
        let _guard = lock.lock().await;
        self.features.compute_features(athlete_id, mode, as_of).await
    }

    pub async fn train(&self, scope: ModelScope) -> Result<ModelReport, AppError> {
        match scope {
            ModelScope::Athlete(athlete_id) => {
                let lock = self.athlete_lock(athlete_id);
                let _guard = lock.lock().await;
                self.model.run(scope).await
            }
            ModelScope::Global => self.model.run(scope).await,
        }
    }

    /// Run `sync → enrich → features (incremental)` for one athlete.
    ///
    /// A failed stage stops the remaining stages for this athlete only.
    pub async fn run_athlete(&self, athlete_id: i64) -> AthleteRunReport {
        let lock = self.athlete_lock(athlete_id);
        let _guard = lock.lock().await;

        let mut report = AthleteRunReport {
            athlete_id,
            sync: StageOutcome::Skipped,
            enrich: StageOutcome::Skipped,
            features: StageOutcome::Skipped,
        };

        let mut sync = SyncReport::default();
        let result = self.ingestor.sync_into(athlete_id, &mut sync).await;
        report.sync = settle(athlete_id, "sync", result, sync);
        if !report.sync.is_completed() {
            return report;
        }

        let mut enrich = EnrichmentReport::default();
        let result = self.enricher.enrich_into(athlete_id, &mut enrich).await;
        report.enrich = settle(athlete_id, "enrich", result, enrich);
        if !report.enrich.is_completed() {
            return report;
        }

        report.features = stage(
            athlete_id,
            "features",
            self.features
                .compute_features(athlete_id, FeatureMode::Incremental, None),
        )
        .await;

        report
    }

    /// Run every athlete with stored credentials, bounded concurrency.
    pub async fn run_all(&self) -> Result<Vec<AthleteRunReport>, AppError> {
        let athlete_ids = self.db.list_athlete_ids_with_tokens().await?;
        tracing::info!(
            athletes = athlete_ids.len(),
            concurrency = self.max_concurrent_athletes,
            "Starting pipeline run for all athletes"
        );

        let mut reports = stream::iter(athlete_ids)
            .map(|athlete_id| self.run_athlete(athlete_id))
            .buffer_unordered(self.max_concurrent_athletes)
            .collect::<Vec<_>>()
            .await;
        reports.sort_by_key(|r| r.athlete_id);

        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        tracing::info!(
            athletes = reports.len(),
            failed,
            "Pipeline run finished"
        );
        Ok(reports)
    }

    /// Delete an athlete's data and drop its cached credential.
    pub async fn delete_athlete(&self, athlete_id: i64) -> Result<u64, AppError> {
        let lock = self.athlete_lock(athlete_id);
        let deleted = {
            let _guard = lock.lock().await;
            let deleted = self.db.delete_athlete(athlete_id).await?;
            self.tokens.forget(athlete_id);
            deleted
        };
        self.athlete_locks.remove(&athlete_id);
        Ok(deleted)
    }
}

async fn stage<T>(
    athlete_id: i64,
    name: &'static str,
    fut: impl std::future::Future<Output = Result<T, AppError>>,
) -> StageOutcome<T> {
    match fut.await {
        Ok(report) => StageOutcome::Completed(report),
        Err(e) => failed(athlete_id, name, e, None),
    }
}

/// Outcome of a stage that filled in `report` as it went.
fn settle<T>(
    athlete_id: i64,
    name: &'static str,
    result: Result<(), AppError>,
    report: T,
) -> StageOutcome<T> {
    match result {
        Ok(()) => StageOutcome::Completed(report),
        Err(e) => failed(athlete_id, name, e, Some(report)),
    }
}

fn failed<T>(
    athlete_id: i64,
    name: &'static str,
    e: AppError,
    partial: Option<T>,
) -> StageOutcome<T> {
    tracing::warn!(athlete_id, stage = name, error = %e, "Stage failed");
    StageOutcome::Failed {
        error: e.to_string(),
        partial,
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Enrichment orchestrator: drives each activity through
//! Pending → DetailDone → Complete.
//!
//! Every successful step commits its data and its status change in one
//! transaction. A failed step only records the error, leaving the activity
//! in its state to be retried on a later pass.

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::models::stream::parse_streams;
use crate::models::{
    ActivityRecord, EnrichmentCandidate, EnrichmentState, EnrichmentStep, PayloadKind,
};
use crate::services::tokens::TokenStore;

/// Result of one enrichment pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentReport {
    pub athlete_id: i64,
    pub selected: u32,
    pub details_fetched: u32,
    pub streams_fetched: u32,
    /// Activities that reached Complete in this pass
    pub completed: u32,
    /// Activities whose step failed and was recorded
    pub failed: u32,
    /// Activities deferred because the rate limit was exhausted
    pub skipped: u32,
}

#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    db: Database,
    tokens: TokenStore,
    batch_size: u32,
    stream_types: Vec<String>,
    stream_resolution: String,
}

impl EnrichmentOrchestrator {
    pub fn new(config: &Config, db: Database, tokens: TokenStore) -> Self {
        Self {
            db,
            tokens,
            batch_size: config.enrich_batch_size.max(1),
            stream_types: config.stream_types.clone(),
            stream_resolution: config.stream_resolution.clone(),
        }
    }

    /// Advance up to `batch_size` non-complete activities, oldest first,
    /// with previously failed activities after the rest.
    ///
    /// Upstream errors for one activity are recorded and its siblings
    /// continue; an exhausted rate limit defers the rest of the batch.
    /// `AuthExpired` and store errors abort the pass.
    pub async fn enrich(&self, athlete_id: i64) -> Result<EnrichmentReport, AppError> {
        let mut report = EnrichmentReport::default();
        self.enrich_into(athlete_id, &mut report).await?;
        Ok(report)
    }

    /// Like `enrich`, but keeps the counts of an aborted pass in `report`.
    pub async fn enrich_into(
        &self,
        athlete_id: i64,
        report: &mut EnrichmentReport,
    ) -> Result<(), AppError> {
        report.athlete_id = athlete_id;
        let batch = self
            .db
            .select_enrichment_batch(athlete_id, self.batch_size)
            .await?;
        report.selected = batch.len() as u32;

        'batch: for (idx, candidate) in batch.iter().enumerate() {
            let mut state = candidate.state();

            while let Some(step) = state.next_step() {
                match self.run_step(candidate, step).await {
                    Ok(()) => {
                        state = state
                            .advance(step)
                            .map_err(|e| AppError::Internal(e.into()))?;
                        match step {
                            EnrichmentStep::FetchDetail => report.details_fetched += 1,
                            EnrichmentStep::FetchStreams => report.streams_fetched += 1,
                        }
                    }
                    Err(e) if e.is_stage_fatal() => {
                        tracing::error!(
                            athlete_id,
                            activity_id = candidate.activity_id,
                            error = %e,
                            "Enrichment aborted"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(
                            athlete_id,
                            activity_id = candidate.activity_id,
                            step = ?step,
                            error = %e,
                            "Enrichment step failed"
                        );
                        self.db
                            .record_enrichment_error(
                                candidate.activity_id,
                                athlete_id,
                                &e.to_string(),
                                Utc::now(),
                            )
                            .await?;
                        report.failed += 1;

                        if matches!(e, AppError::RateLimited) {
                            report.skipped = (batch.len() - idx - 1) as u32;
                            tracing::warn!(
                                athlete_id,
                                skipped = report.skipped,
                                "Rate limit exhausted, deferring rest of batch"
                            );
                            break 'batch;
                        }
                        continue 'batch;
                    }
                }
            }

            if state == EnrichmentState::Complete {
                report.completed += 1;
            }
        }

        tracing::info!(
            athlete_id,
            selected = report.selected,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "Enrichment pass finished"
        );

        Ok(())
    }

    async fn run_step(
        &self,
        candidate: &EnrichmentCandidate,
        step: EnrichmentStep,
    ) -> Result<(), AppError> {
        let cred = self.tokens.get_valid_token(candidate.athlete_id).await?;
        let client = self.tokens.client();

        match step {
            EnrichmentStep::FetchDetail => {
                let payload = client.get_activity(&cred, candidate.activity_id).await?;
                let record =
                    ActivityRecord::from_payload(candidate.athlete_id, &payload, PayloadKind::Detail)?;
                if record.activity_id != candidate.activity_id {
                    return Err(AppError::UpstreamData(format!(
                        "detail for activity {} returned id {}",
                        candidate.activity_id, record.activity_id
                    )));
                }
                self.db.apply_detail(&record, Utc::now()).await
            }
            EnrichmentStep::FetchStreams => {
                let payload = client
                    .get_streams(
                        &cred,
                        candidate.activity_id,
                        &self.stream_types,
                        &self.stream_resolution,
                    )
                    .await?;
                let now = Utc::now();
                let streams = parse_streams(
                    candidate.activity_id,
                    &payload,
                    &self.stream_resolution,
                    now,
                )?;
                self.db
                    .store_streams(candidate.activity_id, candidate.athlete_id, &streams, now)
                    .await
            }
        }
    }
}

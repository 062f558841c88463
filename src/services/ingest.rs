// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Incremental activity ingestion.
//!
//! Pages through the athlete's activity list filtered by the durable `after`
//! cursor. Each page is committed as one transaction, and only then is the
//! cursor advanced, so a crash between the two re-fetches the page instead
//! of skipping it.

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::models::cursor::{KEY_AFTER, SOURCE_ACTIVITIES};
use crate::models::{ActivityRecord, PayloadKind};
use crate::services::tokens::TokenStore;

/// Result of one sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub athlete_id: i64,
    pub pages_fetched: u32,
    pub items_received: u32,
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
    /// Items without an id or start date; never committed
    pub skipped_malformed: u32,
    pub cursor_before: i64,
    pub cursor_after: i64,
    /// False when the run stopped at `max_pages_per_run`
    pub reached_end: bool,
}

/// Fetches activity summaries and upserts them.
#[derive(Clone)]
pub struct ActivityIngestor {
    db: Database,
    tokens: TokenStore,
    per_page: u32,
    max_pages: u32,
    overlap_secs: i64,
    after_default: i64,
}

impl ActivityIngestor {
    pub fn new(config: &Config, db: Database, tokens: TokenStore) -> Self {
        Self {
            db,
            tokens,
            per_page: config.per_page.max(1),
            max_pages: config.max_pages_per_run.max(1),
            overlap_secs: config.cursor_overlap_secs.max(0),
            after_default: config.after_epoch_default,
        }
    }

    /// Current `after` cursor for the athlete (epoch seconds).
    pub async fn cursor(&self, athlete_id: i64) -> Result<i64, AppError> {
        match self
            .db
            .get_cursor(athlete_id, SOURCE_ACTIVITIES, KEY_AFTER)
            .await?
        {
            Some(cursor) => cursor.value.parse().map_err(|_| {
                AppError::Internal(anyhow::anyhow!(
                    "corrupt activity cursor for athlete {}: {:?}",
                    athlete_id,
                    cursor.value
                ))
            }),
            None => Ok(self.after_default),
        }
    }

    /// Fetch new or changed activities since the stored cursor.
    ///
    /// A page failure (after the client's retries) ends the run with an
    /// error. Pages committed before it keep their cursor advance; the
    /// failed page is fetched again next run.
    pub async fn sync_activities(&self, athlete_id: i64) -> Result<SyncReport, AppError> {
        let mut report = SyncReport::default();
        self.sync_into(athlete_id, &mut report).await?;
        Ok(report)
    }

    /// Like `sync_activities`, but counts land in `report` as pages commit,
    /// so a failed run still shows what it committed.
    pub async fn sync_into(
        &self,
        athlete_id: i64,
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        report.athlete_id = athlete_id;
        let after = self.cursor(athlete_id).await?;
        report.cursor_before = after;
        report.cursor_after = after;

        tracing::info!(athlete_id, after, "Starting activity sync");

        for page in 1..=self.max_pages {
            let cred = self.tokens.get_valid_token(athlete_id).await?;
            let items = self
                .tokens
                .client()
                .list_activities(&cred, after, page, self.per_page)
                .await
                .inspect_err(|e| {
                    tracing::warn!(athlete_id, page, error = %e, "Activity page fetch failed, stopping sync");
                })?;

            report.pages_fetched += 1;
            report.items_received += items.len() as u32;

            if items.is_empty() {
                report.reached_end = true;
                break;
            }

            let mut records = Vec::with_capacity(items.len());
            for item in &items {
                match ActivityRecord::from_payload(athlete_id, item, PayloadKind::Summary) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        report.skipped_malformed += 1;
                        tracing::warn!(athlete_id, page, error = %e, "Skipping malformed activity summary");
                    }
                }
            }
            records.sort_by(|a, b| {
                a.start_date
                    .cmp(&b.start_date)
                    .then(a.activity_id.cmp(&b.activity_id))
            });

            let outcome = self.db.upsert_activity_page(&records, Utc::now()).await?;
            report.inserted += outcome.inserted;
            report.updated += outcome.updated;
            report.unchanged += outcome.unchanged;

            // The page is committed; now the cursor may move
            if let Some(last) = records.last() {
                let candidate = last.start_date.timestamp() - self.overlap_secs;
                if candidate > report.cursor_after {
                    self.db
                        .set_cursor(
                            athlete_id,
                            SOURCE_ACTIVITIES,
                            KEY_AFTER,
                            &candidate.to_string(),
                            Utc::now(),
                        )
                        .await?;
                    report.cursor_after = candidate;
                }
            }

            tracing::debug!(
                athlete_id,
                page,
                items = items.len(),
                inserted = outcome.inserted,
                updated = outcome.updated,
                cursor = report.cursor_after,
                "Activity page committed"
            );

            if items.len() < self.per_page as usize {
                report.reached_end = true;
                break;
            }
        }

        tracing::info!(
            athlete_id,
            pages = report.pages_fetched,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped_malformed,
            cursor = report.cursor_after,
            reached_end = report.reached_end,
            "Activity sync finished"
        );

        Ok(())
    }
}

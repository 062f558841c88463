// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite store with typed operations.
//!
//! Provides high-level operations for:
//! - Athletes and their encrypted OAuth tokens
//! - Sync cursors
//! - Activities (summary and detail payloads)
//! - Enrichment status and streams
//! - Feature rows and model predictions
//!
//! Every multi-row write runs in a single transaction, so a failed unit
//! leaves no partial rows behind.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};

use crate::error::Result;
use crate::models::{
    Activity, ActivityRecord, ActivityStream, Athlete, EnrichmentCandidate, EnrichmentCounts,
    EnrichmentStatus, FeatureRow, Prediction, StoredTokens, SyncCursor,
};

/// Outcome of upserting one page of activities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageUpsert {
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
}

/// Database wrapper with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to SQLite and create a connection pool.
    ///
    /// An in-memory database lives only as long as its connection, so it is
    /// limited to a single connection that is never recycled.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        tracing::info!(in_memory, "Connected to SQLite");
        Ok(Self { pool })
    }

    /// Run embedded migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ─── Athlete Operations ──────────────────────────────────────

    pub async fn get_athlete(&self, athlete_id: i64) -> Result<Option<Athlete>> {
        let athlete = sqlx::query_as::<_, Athlete>(
            r#"
            SELECT athlete_id, firstname, lastname, city, country, raw_json, created_at, updated_at
            FROM athletes
            WHERE athlete_id = ?
            "#,
        )
        .bind(athlete_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(athlete)
    }

    /// Insert or refresh an athlete profile. `created_at` is kept on update.
    pub async fn upsert_athlete(&self, athlete: &Athlete) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_athlete(&mut conn, athlete).await
    }

    /// Athletes that have a stored credential, i.e. can be synced.
    pub async fn list_athlete_ids_with_tokens(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT athlete_id FROM strava_tokens ORDER BY athlete_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Delete an athlete and everything derived from them.
    ///
    /// Returns the number of rows removed across all tables.
    pub async fn delete_athlete(&self, athlete_id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        // Children first; predictions and streams have no athlete FK
        for sql in [
            "DELETE FROM model_predictions WHERE athlete_id = ?",
            "DELETE FROM activity_features WHERE athlete_id = ?",
            "DELETE FROM activity_streams WHERE activity_id IN \
             (SELECT activity_id FROM activities WHERE athlete_id = ?)",
            "DELETE FROM enrichment_status WHERE athlete_id = ?",
            "DELETE FROM activities WHERE athlete_id = ?",
            "DELETE FROM sync_cursors WHERE athlete_id = ?",
            "DELETE FROM strava_tokens WHERE athlete_id = ?",
            "DELETE FROM athletes WHERE athlete_id = ?",
        ] {
            deleted += sqlx::query(sql)
                .bind(athlete_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        tracing::info!(athlete_id, deleted, "Athlete data deleted");
        Ok(deleted)
    }

    // ─── Token Operations ────────────────────────────────────────

    pub async fn get_tokens(&self, athlete_id: i64) -> Result<Option<StoredTokens>> {
        let tokens = sqlx::query_as::<_, StoredTokens>(
            r#"
            SELECT athlete_id, access_token_encrypted, refresh_token_encrypted,
                   expires_at, scope, updated_at
            FROM strava_tokens
            WHERE athlete_id = ?
            "#,
        )
        .bind(athlete_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tokens)
    }

    /// Replace the athlete's credential. Access token, refresh token and
    /// expiry are always written together.
    pub async fn set_tokens(&self, tokens: &StoredTokens) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        set_tokens(&mut conn, tokens).await
    }

    /// Store a newly registered athlete and its credential atomically.
    pub async fn save_athlete_with_tokens(
        &self,
        athlete: &Athlete,
        tokens: &StoredTokens,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_athlete(&mut tx, athlete).await?;
        set_tokens(&mut tx, tokens).await?;
        tx.commit().await?;
        Ok(())
    }

    // ─── Cursor Operations ───────────────────────────────────────

    pub async fn get_cursor(
        &self,
        athlete_id: i64,
        source: &str,
        key: &str,
    ) -> Result<Option<SyncCursor>> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            r#"
            SELECT athlete_id, source, key, value, updated_at
            FROM sync_cursors
            WHERE athlete_id = ? AND source = ? AND key = ?
            "#,
        )
        .bind(athlete_id)
        .bind(source)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }

    /// Write a cursor value. Callers are responsible for monotonicity.
    pub async fn set_cursor(
        &self,
        athlete_id: i64,
        source: &str,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (athlete_id, source, key, value, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(athlete_id, source, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(athlete_id)
        .bind(source)
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ─── Activity Operations ─────────────────────────────────────

    pub async fn get_activity(&self, activity_id: i64) -> Result<Option<Activity>> {
        let activity = sqlx::query_as::<_, Activity>(&format!(
            "SELECT {} FROM activities WHERE activity_id = ?",
            ACTIVITY_COLUMNS
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(activity)
    }

    /// Activities for an athlete in chronological order, optionally only
    /// those that started at or before `as_of`.
    pub async fn list_activities(
        &self,
        athlete_id: i64,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<Activity>> {
        let activities = match as_of {
            Some(as_of) => {
                sqlx::query_as::<_, Activity>(&format!(
                    "SELECT {} FROM activities WHERE athlete_id = ? AND start_date <= ? \
                     ORDER BY start_date, activity_id",
                    ACTIVITY_COLUMNS
                ))
                .bind(athlete_id)
                .bind(as_of)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Activity>(&format!(
                    "SELECT {} FROM activities WHERE athlete_id = ? \
                     ORDER BY start_date, activity_id",
                    ACTIVITY_COLUMNS
                ))
                .bind(athlete_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(activities)
    }

    pub async fn count_activities(&self, athlete_id: i64) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM activities WHERE athlete_id = ?")
                .bind(athlete_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Upsert one page of parsed summaries in a single transaction.
    pub async fn upsert_activity_page(
        &self,
        records: &[ActivityRecord],
        now: DateTime<Utc>,
    ) -> Result<PageUpsert> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = PageUpsert::default();

        for record in records {
            let existed = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM activities WHERE activity_id = ?",
            )
            .bind(record.activity_id)
            .fetch_one(&mut *tx)
            .await?
                > 0;

            let changed = upsert_activity(&mut tx, record, now).await?;
            match (existed, changed) {
                (false, _) => outcome.inserted += 1,
                (true, true) => outcome.updated += 1,
                (true, false) => outcome.unchanged += 1,
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    // ─── Enrichment Operations ───────────────────────────────────

    /// Non-complete activities for an athlete, oldest first. Activities with
    /// a recorded error come after all others, fewest attempts first, so a
    /// permanently failing activity cannot starve newer ones.
    pub async fn select_enrichment_batch(
        &self,
        athlete_id: i64,
        limit: u32,
    ) -> Result<Vec<EnrichmentCandidate>> {
        let batch = sqlx::query_as::<_, EnrichmentCandidate>(
            r#"
            SELECT a.activity_id, a.athlete_id, a.start_date,
                   s.detail_fetched_at, s.streams_fetched_at, s.last_error, s.attempts
            FROM activities a
            LEFT JOIN enrichment_status s ON s.activity_id = a.activity_id
            WHERE a.athlete_id = ? AND s.streams_fetched_at IS NULL
            ORDER BY s.last_error IS NOT NULL, COALESCE(s.attempts, 0),
                     a.start_date, a.activity_id
            LIMIT ?
            "#,
        )
        .bind(athlete_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(batch)
    }

    pub async fn get_enrichment_status(
        &self,
        activity_id: i64,
    ) -> Result<Option<EnrichmentStatus>> {
        let status = sqlx::query_as::<_, EnrichmentStatus>(
            r#"
            SELECT activity_id, athlete_id, detail_fetched_at, streams_fetched_at,
                   last_error, attempts, updated_at
            FROM enrichment_status
            WHERE activity_id = ?
            "#,
        )
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    /// Replace the activity with its detail payload and mark the detail as
    /// fetched, in one transaction.
    pub async fn apply_detail(&self, record: &ActivityRecord, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        upsert_activity(&mut tx, record, now).await?;

        sqlx::query(
            r#"
            INSERT INTO enrichment_status
                (activity_id, athlete_id, detail_fetched_at, streams_fetched_at,
                 last_error, attempts, updated_at)
            VALUES (?, ?, ?, NULL, NULL, 0, ?)
            ON CONFLICT(activity_id) DO UPDATE SET
                detail_fetched_at = excluded.detail_fetched_at,
                last_error = NULL,
                attempts = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.activity_id)
        .bind(record.athlete_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Overwrite the activity's streams and mark them as fetched, in one
    /// transaction.
    pub async fn store_streams(
        &self,
        activity_id: i64,
        athlete_id: i64,
        streams: &[ActivityStream],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM activity_streams WHERE activity_id = ?")
            .bind(activity_id)
            .execute(&mut *tx)
            .await?;

        for stream in streams {
            sqlx::query(
                r#"
                INSERT INTO activity_streams
                    (activity_id, stream_type, resolution, series_type,
                     original_size, data_json, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(activity_id)
            .bind(&stream.stream_type)
            .bind(&stream.resolution)
            .bind(&stream.series_type)
            .bind(stream.original_size)
            .bind(&stream.data_json)
            .bind(stream.fetched_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO enrichment_status
                (activity_id, athlete_id, detail_fetched_at, streams_fetched_at,
                 last_error, attempts, updated_at)
            VALUES (?, ?, NULL, ?, NULL, 0, ?)
            ON CONFLICT(activity_id) DO UPDATE SET
                streams_fetched_at = excluded.streams_fetched_at,
                last_error = NULL,
                attempts = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(activity_id)
        .bind(athlete_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Record a failed step. Timestamps are untouched, so the activity stays
    /// in its current state.
    pub async fn record_enrichment_error(
        &self,
        activity_id: i64,
        athlete_id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_status
                (activity_id, athlete_id, detail_fetched_at, streams_fetched_at,
                 last_error, attempts, updated_at)
            VALUES (?, ?, NULL, NULL, ?, 1, ?)
            ON CONFLICT(activity_id) DO UPDATE SET
                last_error = excluded.last_error,
                attempts = enrichment_status.attempts + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(activity_id)
        .bind(athlete_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_streams(&self, activity_id: i64) -> Result<Vec<ActivityStream>> {
        let streams = sqlx::query_as::<_, ActivityStream>(
            r#"
            SELECT activity_id, stream_type, resolution, series_type,
                   original_size, data_json, fetched_at
            FROM activity_streams
            WHERE activity_id = ?
            ORDER BY stream_type, resolution
            "#,
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(streams)
    }

    pub async fn enrichment_counts(&self, athlete_id: i64) -> Result<EnrichmentCounts> {
        let (pending, detail_done, complete, with_errors) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN s.detail_fetched_at IS NULL
                                       AND s.streams_fetched_at IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN s.detail_fetched_at IS NOT NULL
                                       AND s.streams_fetched_at IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN s.streams_fetched_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN s.last_error IS NOT NULL THEN 1 ELSE 0 END), 0)
                FROM activities a
                LEFT JOIN enrichment_status s ON s.activity_id = a.activity_id
                WHERE a.athlete_id = ?
                "#,
            )
            .bind(athlete_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(EnrichmentCounts {
            pending,
            detail_done,
            complete,
            with_errors,
        })
    }

    // ─── Feature Operations ──────────────────────────────────────

    /// Replace all of an athlete's feature rows in one transaction.
    pub async fn replace_features(&self, athlete_id: i64, rows: &[FeatureRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM activity_features WHERE athlete_id = ?")
            .bind(athlete_id)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            upsert_feature(&mut tx, row).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Upsert feature rows in one transaction.
    pub async fn upsert_features(&self, rows: &[FeatureRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            upsert_feature(&mut tx, row).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Start date of the newest stored feature row.
    pub async fn latest_feature_start(&self, athlete_id: i64) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT start_date FROM activity_features
            WHERE athlete_id = ?
            ORDER BY start_date DESC, activity_id DESC
            LIMIT 1
            "#,
        )
        .bind(athlete_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest)
    }

    /// When each of the athlete's feature rows was computed, by activity.
    pub async fn feature_computed_at(
        &self,
        athlete_id: i64,
    ) -> Result<HashMap<i64, DateTime<Utc>>> {
        let stamps = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "SELECT activity_id, computed_at FROM activity_features WHERE athlete_id = ?",
        )
        .bind(athlete_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stamps.into_iter().collect())
    }

    /// Feature rows in chronological order, for one athlete or all of them.
    pub async fn list_features(&self, athlete_id: Option<i64>) -> Result<Vec<FeatureRow>> {
        let query = match athlete_id {
            Some(_) => format!(
                "SELECT {} FROM activity_features WHERE athlete_id = ? \
                 ORDER BY start_date, activity_id",
                FEATURE_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM activity_features ORDER BY start_date, activity_id",
                FEATURE_COLUMNS
            ),
        };

        let mut q = sqlx::query_as::<_, FeatureRow>(&query);
        if let Some(athlete_id) = athlete_id {
            q = q.bind(athlete_id);
        }

        Ok(q.fetch_all(&self.pool).await?)
    }

    // ─── Prediction Operations ───────────────────────────────────

    /// Upsert a batch of predictions in one transaction.
    pub async fn upsert_predictions(&self, predictions: &[Prediction]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for p in predictions {
            sqlx::query(
                r#"
                INSERT INTO model_predictions
                    (athlete_id, activity_id, prediction_type, model_name, model_version,
                     predicted_pace_s_per_km, predicted_time_s, features_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(athlete_id, activity_id, prediction_type, model_version)
                DO UPDATE SET
                    model_name = excluded.model_name,
                    predicted_pace_s_per_km = excluded.predicted_pace_s_per_km,
                    predicted_time_s = excluded.predicted_time_s,
                    features_json = excluded.features_json,
                    created_at = excluded.created_at
                "#,
            )
            .bind(p.athlete_id)
            .bind(p.activity_id)
            .bind(&p.prediction_type)
            .bind(&p.model_name)
            .bind(&p.model_version)
            .bind(p.predicted_pace_s_per_km)
            .bind(p.predicted_time_s)
            .bind(&p.features_json)
            .bind(p.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_predictions(
        &self,
        athlete_id: i64,
        model_version: Option<&str>,
    ) -> Result<Vec<Prediction>> {
        let predictions = sqlx::query_as::<_, Prediction>(
            r#"
            SELECT athlete_id, activity_id, prediction_type, model_name, model_version,
                   predicted_pace_s_per_km, predicted_time_s, features_json, created_at
            FROM model_predictions
            WHERE athlete_id = ? AND (? IS NULL OR model_version = ?)
            ORDER BY activity_id, prediction_type, model_version
            "#,
        )
        .bind(athlete_id)
        .bind(model_version)
        .bind(model_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(predictions)
    }
}

// ─── Helper Functions ──────────────────────────────────────────

const ACTIVITY_COLUMNS: &str = "activity_id, athlete_id, name, sport_type, start_date, timezone, \
     elapsed_time_s, moving_time_s, distance_m, elevation_gain_m, average_speed_mps, \
     max_speed_mps, average_heartrate, max_heartrate, average_watts, max_watts, \
     average_cadence, trainer, commute, start_lat, start_lng, raw_kind, raw_json, \
     created_at, updated_at";

const FEATURE_COLUMNS: &str = "activity_id, athlete_id, start_date, sport_type, moving_time_s, \
     distance_m, elevation_gain_m, pace_s_per_km, elev_m_per_km, avg_hr, max_hr, avg_watts, \
     max_watts, hr_x_time, dist_7d_m, elev_7d_m, time_7d_s, dist_28d_m, elev_28d_m, \
     time_28d_s, computed_at";

async fn upsert_athlete(conn: &mut SqliteConnection, athlete: &Athlete) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO athletes
            (athlete_id, firstname, lastname, city, country, raw_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id) DO UPDATE SET
            firstname = excluded.firstname,
            lastname = excluded.lastname,
            city = excluded.city,
            country = excluded.country,
            raw_json = excluded.raw_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(athlete.athlete_id)
    .bind(&athlete.firstname)
    .bind(&athlete.lastname)
    .bind(&athlete.city)
    .bind(&athlete.country)
    .bind(&athlete.raw_json)
    .bind(athlete.created_at)
    .bind(athlete.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn set_tokens(conn: &mut SqliteConnection, tokens: &StoredTokens) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO strava_tokens
            (athlete_id, access_token_encrypted, refresh_token_encrypted,
             expires_at, scope, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(athlete_id) DO UPDATE SET
            access_token_encrypted = excluded.access_token_encrypted,
            refresh_token_encrypted = excluded.refresh_token_encrypted,
            expires_at = excluded.expires_at,
            scope = excluded.scope,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tokens.athlete_id)
    .bind(&tokens.access_token_encrypted)
    .bind(&tokens.refresh_token_encrypted)
    .bind(tokens.expires_at)
    .bind(&tokens.scope)
    .bind(tokens.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Insert or refresh one activity. Returns whether a row was written.
///
/// Rows whose fields and payload are unchanged are left alone (and not
/// counted). A stored detail payload is never replaced by a summary one.
async fn upsert_activity(
    conn: &mut SqliteConnection,
    record: &ActivityRecord,
    now: DateTime<Utc>,
) -> Result<bool> {
    let m = &record.metrics;
    let result = sqlx::query(
        r#"
        INSERT INTO activities (
            activity_id, athlete_id, name, sport_type, start_date, timezone,
            elapsed_time_s, moving_time_s, distance_m, elevation_gain_m,
            average_speed_mps, max_speed_mps, average_heartrate, max_heartrate,
            average_watts, max_watts, average_cadence, trainer, commute,
            start_lat, start_lng, raw_kind, raw_json, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(activity_id) DO UPDATE SET
            athlete_id = excluded.athlete_id,
            name = excluded.name,
            sport_type = excluded.sport_type,
            start_date = excluded.start_date,
            timezone = excluded.timezone,
            elapsed_time_s = excluded.elapsed_time_s,
            moving_time_s = excluded.moving_time_s,
            distance_m = excluded.distance_m,
            elevation_gain_m = excluded.elevation_gain_m,
            average_speed_mps = excluded.average_speed_mps,
            max_speed_mps = excluded.max_speed_mps,
            average_heartrate = excluded.average_heartrate,
            max_heartrate = excluded.max_heartrate,
            average_watts = excluded.average_watts,
            max_watts = excluded.max_watts,
            average_cadence = excluded.average_cadence,
            trainer = excluded.trainer,
            commute = excluded.commute,
            start_lat = excluded.start_lat,
            start_lng = excluded.start_lng,
            raw_kind = CASE
                WHEN activities.raw_kind = 'detail' AND excluded.raw_kind = 'summary'
                THEN activities.raw_kind ELSE excluded.raw_kind END,
            raw_json = CASE
                WHEN activities.raw_kind = 'detail' AND excluded.raw_kind = 'summary'
                THEN activities.raw_json ELSE excluded.raw_json END,
            updated_at = excluded.updated_at
        WHERE activities.athlete_id IS NOT excluded.athlete_id
           OR activities.name IS NOT excluded.name
           OR activities.sport_type IS NOT excluded.sport_type
           OR activities.start_date IS NOT excluded.start_date
           OR activities.timezone IS NOT excluded.timezone
           OR activities.elapsed_time_s IS NOT excluded.elapsed_time_s
           OR activities.moving_time_s IS NOT excluded.moving_time_s
           OR activities.distance_m IS NOT excluded.distance_m
           OR activities.elevation_gain_m IS NOT excluded.elevation_gain_m
           OR activities.average_speed_mps IS NOT excluded.average_speed_mps
           OR activities.max_speed_mps IS NOT excluded.max_speed_mps
           OR activities.average_heartrate IS NOT excluded.average_heartrate
           OR activities.max_heartrate IS NOT excluded.max_heartrate
           OR activities.average_watts IS NOT excluded.average_watts
           OR activities.max_watts IS NOT excluded.max_watts
           OR activities.average_cadence IS NOT excluded.average_cadence
           OR activities.trainer IS NOT excluded.trainer
           OR activities.commute IS NOT excluded.commute
           OR activities.start_lat IS NOT excluded.start_lat
           OR activities.start_lng IS NOT excluded.start_lng
           OR (excluded.raw_kind = 'detail' AND activities.raw_kind IS NOT 'detail')
           OR (activities.raw_kind = excluded.raw_kind
               AND activities.raw_json IS NOT excluded.raw_json)
        "#,
    )
    .bind(record.activity_id)
    .bind(record.athlete_id)
    .bind(&m.name)
    .bind(&m.sport_type)
    .bind(record.start_date)
    .bind(&m.timezone)
    .bind(m.elapsed_time_s)
    .bind(m.moving_time_s)
    .bind(m.distance_m)
    .bind(m.elevation_gain_m)
    .bind(m.average_speed_mps)
    .bind(m.max_speed_mps)
    .bind(m.average_heartrate)
    .bind(m.max_heartrate)
    .bind(m.average_watts)
    .bind(m.max_watts)
    .bind(m.average_cadence)
    .bind(m.trainer)
    .bind(m.commute)
    .bind(m.start_lat)
    .bind(m.start_lng)
    .bind(record.raw.kind.as_str())
    .bind(&record.raw.json)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn upsert_feature(conn: &mut SqliteConnection, row: &FeatureRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO activity_features (
            activity_id, athlete_id, start_date, sport_type, moving_time_s,
            distance_m, elevation_gain_m, pace_s_per_km, elev_m_per_km, avg_hr, max_hr,
            avg_watts, max_watts, hr_x_time, dist_7d_m, elev_7d_m, time_7d_s,
            dist_28d_m, elev_28d_m, time_28d_s, computed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(activity_id) DO UPDATE SET
            athlete_id = excluded.athlete_id,
            start_date = excluded.start_date,
            sport_type = excluded.sport_type,
            moving_time_s = excluded.moving_time_s,
            distance_m = excluded.distance_m,
            elevation_gain_m = excluded.elevation_gain_m,
            pace_s_per_km = excluded.pace_s_per_km,
            elev_m_per_km = excluded.elev_m_per_km,
            avg_hr = excluded.avg_hr,
            max_hr = excluded.max_hr,
            avg_watts = excluded.avg_watts,
            max_watts = excluded.max_watts,
            hr_x_time = excluded.hr_x_time,
            dist_7d_m = excluded.dist_7d_m,
            elev_7d_m = excluded.elev_7d_m,
            time_7d_s = excluded.time_7d_s,
            dist_28d_m = excluded.dist_28d_m,
            elev_28d_m = excluded.elev_28d_m,
            time_28d_s = excluded.time_28d_s,
            computed_at = excluded.computed_at
        "#,
    )
    .bind(row.activity_id)
    .bind(row.athlete_id)
    .bind(row.start_date)
    .bind(&row.sport_type)
    .bind(row.moving_time_s)
    .bind(row.distance_m)
    .bind(row.elevation_gain_m)
    .bind(row.pace_s_per_km)
    .bind(row.elev_m_per_km)
    .bind(row.avg_hr)
    .bind(row.max_hr)
    .bind(row.avg_watts)
    .bind(row.max_watts)
    .bind(row.hr_x_time)
    .bind(row.dist_7d_m)
    .bind(row.elev_7d_m)
    .bind(row.time_7d_s)
    .bind(row.dist_28d_m)
    .bind(row.elev_28d_m)
    .bind(row.time_28d_s)
    .bind(row.computed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

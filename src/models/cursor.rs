//! Durable ingestion cursors.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Cursor source for the activity list.
pub const SOURCE_ACTIVITIES: &str = "activities";
/// Cursor key holding the `after` filter (epoch seconds).
pub const KEY_AFTER: &str = "after";

/// One row of `sync_cursors`: `(athlete, source, key) -> value`.
///
/// The value is opaque to the store; the ingestor owns its format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SyncCursor {
    pub athlete_id: i64,
    pub source: String,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

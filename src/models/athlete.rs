//! Athlete and OAuth credential models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Athlete profile stored in the `athletes` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Athlete {
    /// Strava athlete ID (primary key)
    pub athlete_id: i64,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Verbatim profile payload
    #[serde(skip)]
    pub raw_json: Option<String>,
    /// When the athlete first authenticated
    pub created_at: DateTime<Utc>,
    /// Last profile refresh
    pub updated_at: DateTime<Utc>,
}

impl Athlete {
    /// Build an athlete from the `/athlete` profile payload.
    pub fn from_profile(payload: &Value, now: DateTime<Utc>) -> Result<Self, AppError> {
        let athlete_id = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::UpstreamData("athlete profile has no id".to_string()))?;

        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);

        Ok(Self {
            athlete_id,
            firstname: text("firstname"),
            lastname: text("lastname"),
            city: text("city"),
            country: text("country"),
            raw_json: Some(payload.to_string()),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Decrypted OAuth credential for one athlete.
///
/// `expires_at` always belongs to `access_token`; the two are only ever
/// persisted together.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenCredential {
    pub athlete_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCredential")
            .field("athlete_id", &self.athlete_id)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// OAuth tokens as stored (encrypted) in `strava_tokens`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTokens {
    pub athlete_id: i64,
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64)
    pub refresh_token_encrypted: String,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
    /// Granted OAuth scope (comma separated, as Strava reports it)
    pub scope: Option<String>,
    pub updated_at: DateTime<Utc>,
}

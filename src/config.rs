//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup. Secrets (client secret, token encryption secret,
//! scheduler token) come from the environment or a local `.env` file.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default Strava REST base URL.
pub const STRAVA_API_BASE: &str = "https://www.strava.com/api/v3";
/// Default Strava OAuth token endpoint.
pub const STRAVA_OAUTH_URL: &str = "https://www.strava.com/oauth/token";

/// Bounded exponential backoff for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// SQLite connection string
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Strava REST base URL (overridable for tests)
    pub strava_api_base: String,
    /// Strava OAuth token endpoint (overridable for tests)
    pub strava_oauth_url: String,

    // --- Ingestion ---
    /// Page size for the activity list endpoint
    pub per_page: u32,
    /// Cursor value used when an athlete has never been synced (epoch seconds)
    pub after_epoch_default: i64,
    /// Upper bound on pages fetched in one sync run
    pub max_pages_per_run: u32,
    /// Seconds subtracted from the last start time when advancing the cursor
    pub cursor_overlap_secs: i64,

    // --- Enrichment ---
    pub enrich_batch_size: u32,
    pub stream_types: Vec<String>,
    pub stream_resolution: String,

    // --- Retries / scheduling ---
    pub retry: RetryPolicy,
    pub max_concurrent_athletes: usize,

    // --- Model ---
    pub model_version: String,

    // --- Secrets ---
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Secret the token encryption key is derived from
    pub token_encryption_secret: Vec<u8>,
    /// Bearer token the external scheduler presents on `/tasks/*`
    pub scheduler_token: String,
    /// Optional refresh token used to register an athlete at startup
    pub bootstrap_refresh_token: Option<String>,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            strava_client_id: "test_client_id".to_string(),
            database_url: "sqlite::memory:".to_string(),
            port: 8080,
            strava_api_base: STRAVA_API_BASE.to_string(),
            strava_oauth_url: STRAVA_OAUTH_URL.to_string(),
            per_page: 50,
            after_epoch_default: 0,
            max_pages_per_run: 20,
            cursor_overlap_secs: 60,
            enrich_batch_size: 25,
            stream_types: default_stream_types(),
            stream_resolution: "medium".to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            max_concurrent_athletes: 4,
            model_version: "v1".to_string(),
            strava_client_secret: "test_secret".to_string(),
            token_encryption_secret: b"test_token_encryption_secret_32b".to_vec(),
            scheduler_token: "test_scheduler_token".to_string(),
            bootstrap_refresh_token: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let retry = RetryPolicy {
            max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 4)?,
            base_delay: Duration::from_millis(parse_or("RETRY_BASE_DELAY_MS", 1000)?),
            max_delay: Duration::from_millis(parse_or("RETRY_MAX_DELAY_MS", 30_000)?),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("RETRY_MAX_ATTEMPTS"));
        }

        let stream_types = env::var("STREAM_TYPES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|_| default_stream_types());

        Ok(Self {
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_ID"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://pace.db?mode=rwc".to_string()),
            port: parse_or("PORT", 8080)?,
            strava_api_base: env::var("STRAVA_API_BASE")
                .unwrap_or_else(|_| STRAVA_API_BASE.to_string()),
            strava_oauth_url: env::var("STRAVA_OAUTH_URL")
                .unwrap_or_else(|_| STRAVA_OAUTH_URL.to_string()),

            per_page: parse_or("STRAVA_PER_PAGE", 50)?,
            after_epoch_default: parse_or("STRAVA_AFTER_EPOCH_DEFAULT", 0)?,
            max_pages_per_run: parse_or("SYNC_MAX_PAGES", 20)?,
            cursor_overlap_secs: parse_or("CURSOR_OVERLAP_SECS", 60)?,

            enrich_batch_size: parse_or("ENRICH_BATCH_SIZE", 25)?,
            stream_types,
            stream_resolution: env::var("STREAM_RESOLUTION")
                .unwrap_or_else(|_| "medium".to_string()),

            retry,
            max_concurrent_athletes: parse_or("MAX_CONCURRENT_ATHLETES", 4)?,

            model_version: env::var("MODEL_VERSION").unwrap_or_else(|_| "v1".to_string()),

            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_SECRET"))?,
            token_encryption_secret: env::var("TOKEN_ENCRYPTION_SECRET")
                .map_err(|_| ConfigError::Missing("TOKEN_ENCRYPTION_SECRET"))?
                .into_bytes(),
            scheduler_token: env::var("SCHEDULER_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SCHEDULER_TOKEN"))?,
            bootstrap_refresh_token: env::var("STRAVA_REFRESH_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

fn default_stream_types() -> Vec<String> {
    ["time", "distance", "altitude", "heartrate", "velocity_smooth"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Parse an optional env var, falling back to `default` when unset.
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

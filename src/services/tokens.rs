// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token store: the single source of valid access tokens.
//!
//! Keeps one credential per athlete, encrypted at rest, and refreshes it
//! before it is handed out if it is expired or about to expire.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::error::AppError;
use crate::models::{Athlete, StoredTokens, TokenCredential};
use crate::services::cipher::TokenCipher;
use crate::services::strava::{RefreshOutcome, StravaClient, TokenRefreshResponse};
use crate::time_utils::from_epoch;

/// Margin before token expiration when we proactively refresh (5 minutes).
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Shared cache of decrypted credentials, keyed by athlete.
pub type TokenCache = Arc<DashMap<i64, TokenCredential>>;

/// Shared per-athlete refresh locks.
pub type RefreshLocks = Arc<DashMap<i64, Arc<Mutex<()>>>>;

/// Token lifecycle management on top of the store and the Strava client.
///
/// - Decrypts stored credentials lazily and caches them in memory
/// - Refreshes tokens inside the safety margin, once per athlete at a time
/// - Persists refreshed credentials before returning them
#[derive(Clone)]
pub struct TokenStore {
    client: StravaClient,
    db: Database,
    cipher: TokenCipher,
    cache: TokenCache,
    refresh_locks: RefreshLocks,
}

fn is_usable(cred: &TokenCredential, now: DateTime<Utc>) -> bool {
    now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < cred.expires_at
}

impl TokenStore {
    pub fn new(client: StravaClient, db: Database, cipher: TokenCipher) -> Self {
        Self {
            client,
            db,
            cipher,
            cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn client(&self) -> &StravaClient {
        &self.client
    }

    /// Get a credential whose access token is valid beyond the safety margin.
    ///
    /// 1. Check the in-memory cache (no I/O)
    /// 2. Acquire the athlete's refresh lock and re-check the cache
    /// 3. Load and decrypt the stored credential; return it if still valid
    /// 4. Otherwise refresh, persist, cache, then return
    ///
    /// A rejected refresh token yields `AuthExpired`, unless another process
    /// already stored a newer valid credential.
    pub async fn get_valid_token(&self, athlete_id: i64) -> Result<TokenCredential, AppError> {
        if let Some(cached) = self.cache.get(&athlete_id) {
            if is_usable(&cached, Utc::now()) {
                return Ok(cached.clone());
            }
        }

        let lock = self
            .refresh_locks
            .entry(athlete_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting
        if let Some(cached) = self.cache.get(&athlete_id) {
            if is_usable(&cached, Utc::now()) {
                return Ok(cached.clone());
            }
        }

        let stored = self.load(athlete_id).await?;
        if is_usable(&stored, Utc::now()) {
            self.cache.insert(athlete_id, stored.clone());
            return Ok(stored);
        }

        tracing::info!(athlete_id, expires_at = %stored.expires_at, "Access token expired, refreshing");

        let response = match self.client.refresh_token(&stored.refresh_token).await? {
            RefreshOutcome::Refreshed(response) => response,
            RefreshOutcome::Rejected(body) => {
                return self.recover_from_rejection(athlete_id, &stored, &body).await;
            }
        };

        let cred = credential_from_response(athlete_id, response, stored.scope.clone())?;
        self.persist(&cred).await?;
        self.cache.insert(athlete_id, cred.clone());
        tracing::info!(athlete_id, expires_at = %cred.expires_at, "Token refreshed and stored");

        self.refresh_profile(&cred).await;
        Ok(cred)
    }

    /// Handle a rejected refresh token.
    ///
    /// If another process won a refresh race, the stored row now holds its
    /// newer credential; otherwise the athlete must re-consent.
    async fn recover_from_rejection(
        &self,
        athlete_id: i64,
        used: &TokenCredential,
        body: &str,
    ) -> Result<TokenCredential, AppError> {
        let current = self.load(athlete_id).await?;
        if current.refresh_token != used.refresh_token && is_usable(&current, Utc::now()) {
            tracing::info!(
                athlete_id,
                "Refresh token race detected - using credential stored by the winner"
            );
            self.cache.insert(athlete_id, current.clone());
            return Ok(current);
        }

        self.cache.remove(&athlete_id);
        tracing::error!(athlete_id, body = %body, "Refresh token rejected, athlete must re-authorize");
        Err(AppError::AuthExpired(athlete_id))
    }

    /// Bootstrap an athlete from a refresh token.
    ///
    /// Refreshes it, fetches the profile to learn the athlete ID, then stores
    /// athlete and credential together.
    pub async fn register(&self, refresh_token: &str) -> Result<Athlete, AppError> {
        let response = match self.client.refresh_token(refresh_token).await? {
            RefreshOutcome::Refreshed(response) => response,
            RefreshOutcome::Rejected(_) => {
                return Err(AppError::BadRequest(
                    "Strava rejected the refresh token".to_string(),
                ))
            }
        };

        let hinted_id = response
            .athlete
            .as_ref()
            .and_then(|a| a.get("id"))
            .and_then(|id| id.as_i64())
            .unwrap_or_default();

        let mut cred = credential_from_response(hinted_id, response, None)?;
        let profile = self.client.get_athlete(&cred).await?;
        let athlete = Athlete::from_profile(&profile, Utc::now())?;
        cred.athlete_id = athlete.athlete_id;

        let stored = self.seal(&cred)?;
        self.db.save_athlete_with_tokens(&athlete, &stored).await?;
        self.cache.insert(athlete.athlete_id, cred);

        tracing::info!(
            athlete_id = athlete.athlete_id,
            firstname = ?athlete.firstname,
            "Athlete registered"
        );
        Ok(athlete)
    }

    /// Drop any cached credential for the athlete.
    pub fn forget(&self, athlete_id: i64) {
        self.cache.remove(&athlete_id);
        self.refresh_locks.remove(&athlete_id);
    }

    /// Load and decrypt the stored credential.
    async fn load(&self, athlete_id: i64) -> Result<TokenCredential, AppError> {
        let stored = self
            .db
            .get_tokens(athlete_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tokens for athlete {}", athlete_id)))?;

        Ok(TokenCredential {
            athlete_id,
            access_token: self
                .cipher
                .decrypt(athlete_id, &stored.access_token_encrypted)?,
            refresh_token: self
                .cipher
                .decrypt(athlete_id, &stored.refresh_token_encrypted)?,
            expires_at: stored.expires_at,
            scope: stored.scope,
        })
    }

    /// Encrypt and store a credential, replacing the previous one.
    pub async fn persist(&self, cred: &TokenCredential) -> Result<(), AppError> {
        let stored = self.seal(cred)?;
        self.db.set_tokens(&stored).await
    }

    fn seal(&self, cred: &TokenCredential) -> Result<StoredTokens, AppError> {
        Ok(StoredTokens {
            athlete_id: cred.athlete_id,
            access_token_encrypted: self.cipher.encrypt(cred.athlete_id, &cred.access_token)?,
            refresh_token_encrypted: self.cipher.encrypt(cred.athlete_id, &cred.refresh_token)?,
            expires_at: cred.expires_at,
            scope: cred.scope.clone(),
            updated_at: Utc::now(),
        })
    }

    /// Re-fetch the athlete profile after a refresh. Failures are logged only.
    async fn refresh_profile(&self, cred: &TokenCredential) {
        let result = async {
            let profile = self.client.get_athlete(cred).await?;
            let athlete = Athlete::from_profile(&profile, Utc::now())?;
            self.db.upsert_athlete(&athlete).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(athlete_id = cred.athlete_id, error = %e, "Failed to refresh athlete profile, continuing anyway");
        }
    }
}

fn credential_from_response(
    athlete_id: i64,
    response: TokenRefreshResponse,
    previous_scope: Option<String>,
) -> Result<TokenCredential, AppError> {
    let expires_at = from_epoch(response.expires_at).ok_or_else(|| {
        AppError::UpstreamData(format!("invalid expires_at {}", response.expires_at))
    })?;

    let cred = TokenCredential {
        athlete_id,
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at,
        scope: response.scope.or(previous_scope),
    };

    if !is_usable(&cred, Utc::now()) {
        return Err(AppError::UpstreamData(format!(
            "refreshed token already expires at {}",
            cred.expires_at
        )));
    }
    Ok(cred)
}

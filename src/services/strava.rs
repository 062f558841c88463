// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for token refresh and activity reads.
//!
//! Handles:
//! - Token refresh against the OAuth endpoint
//! - Paginated activity lists, activity detail and streams
//! - Mapping HTTP failures onto the upstream error taxonomy
//! - Bounded exponential backoff for rate limits and transient failures
//!
//! Payloads are returned as raw JSON; parsing happens at the ingestion
//! boundary in the models.

use serde::Deserialize;
use serde_json::Value;

use crate::config::{Config, RetryPolicy};
use crate::error::AppError;
use crate::models::TokenCredential;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    api_base: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
    retry: RetryPolicy,
}

/// Result of presenting a refresh token to the OAuth endpoint.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(TokenRefreshResponse),
    /// The token endpoint rejected the refresh token (`invalid_grant`).
    Rejected(String),
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub scope: Option<String>,
    /// Only present on some grant types
    #[serde(default)]
    pub athlete: Option<Value>,
}

impl StravaClient {
    /// Create a new Strava client from configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.strava_api_base.trim_end_matches('/').to_string(),
            oauth_url: config.strava_oauth_url.clone(),
            client_id: config.strava_client_id.clone(),
            client_secret: config.strava_client_secret.clone(),
            retry: config.retry,
        }
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshOutcome, AppError> {
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&self.oauth_url)
                .form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ])
                .send()
                .await;

            let err = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map(RefreshOutcome::Refreshed)
                            .map_err(|e| {
                                AppError::UpstreamData(format!(
                                    "Failed to parse token response: {}",
                                    e
                                ))
                            });
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 400 || status.as_u16() == 401 {
                        tracing::warn!(status = %status, "Strava rejected refresh token");
                        return Ok(RefreshOutcome::Rejected(body));
                    }
                    classify_status(status, body, None)
                }
                Err(e) => AppError::TransientNetwork(format!("Token refresh request failed: {}", e)),
            };

            attempt = self.backoff("token refresh", attempt, err).await?;
        }
    }

    /// List one page of activity summaries started after `after` (epoch seconds).
    pub async fn list_activities(
        &self,
        cred: &TokenCredential,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Value>, AppError> {
        let url = format!("{}/athlete/activities", self.api_base);
        let query = [
            ("after", after.to_string()),
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ];

        match self.get_json(cred, &url, &query).await? {
            Value::Array(items) => Ok(items),
            other => Err(AppError::UpstreamData(format!(
                "activity list is not an array: {}",
                type_name(&other)
            ))),
        }
    }

    /// Get a detailed activity by ID.
    pub async fn get_activity(
        &self,
        cred: &TokenCredential,
        activity_id: i64,
    ) -> Result<Value, AppError> {
        let url = format!("{}/activities/{}", self.api_base, activity_id);
        self.get_json(cred, &url, &[]).await
    }

    /// Get streams for an activity, keyed by type.
    pub async fn get_streams(
        &self,
        cred: &TokenCredential,
        activity_id: i64,
        keys: &[String],
        resolution: &str,
    ) -> Result<Value, AppError> {
        let url = format!("{}/activities/{}/streams", self.api_base, activity_id);
        let query = [
            ("keys", keys.join(",")),
            ("key_by_type", "true".to_string()),
            ("resolution", resolution.to_string()),
        ];
        self.get_json(cred, &url, &query).await
    }

    /// Get the authenticated athlete profile.
    pub async fn get_athlete(&self, cred: &TokenCredential) -> Result<Value, AppError> {
        let url = format!("{}/athlete", self.api_base);
        self.get_json(cred, &url, &[]).await
    }

    /// GET with bearer auth, retrying rate limits and transient failures.
    async fn get_json(
        &self,
        cred: &TokenCredential,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Value, AppError> {
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .get(url)
                .bearer_auth(&cred.access_token)
                .query(query)
                .send()
                .await;

            let err = match result {
                Ok(response) if response.status().is_success() => {
                    return response.json().await.map_err(|e| {
                        AppError::UpstreamData(format!("JSON parse error: {}", e))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    classify_status(status, body, Some(cred.athlete_id))
                }
                Err(e) => AppError::TransientNetwork(e.to_string()),
            };

            attempt = self.backoff(url, attempt, err).await?;
        }
    }

    /// Sleep before the next attempt, or give up with `err`.
    ///
    /// Returns the next attempt number when `err` is retryable and the
    /// attempt budget is not exhausted.
    async fn backoff(&self, what: &str, attempt: u32, err: AppError) -> Result<u32, AppError> {
        if !err.is_retryable() || attempt + 1 >= self.retry.max_attempts {
            if err.is_retryable() {
                tracing::warn!(request = what, attempts = attempt + 1, error = %err, "Giving up on Strava request");
            }
            return Err(err);
        }

        let delay = self.retry.delay_for(attempt);
        tracing::info!(
            request = what,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying Strava request"
        );
        tokio::time::sleep(delay).await;
        Ok(attempt + 1)
    }
}

/// Map a non-success status onto the error taxonomy.
fn classify_status(status: reqwest::StatusCode, body: String, athlete_id: Option<i64>) -> AppError {
    match status.as_u16() {
        429 => {
            tracing::warn!("Strava rate limit hit (429)");
            AppError::RateLimited
        }
        401 => match athlete_id {
            Some(id) => AppError::AuthExpired(id),
            None => AppError::StravaApi(format!("HTTP {}: {}", status, body)),
        },
        500..=599 => AppError::TransientNetwork(format!("HTTP {}", status)),
        _ => AppError::StravaApi(format!("HTTP {}: {}", status, body)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

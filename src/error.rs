// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! The upstream taxonomy (`AuthExpired`, `RateLimited`, `TransientNetwork`,
//! `UpstreamData`) drives retry and isolation decisions in the pipeline
//! stages; the rest map store and request failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The refresh token (or the access it grants) was rejected upstream.
    /// Fatal for the athlete until they re-consent.
    #[error("Strava authorization expired for athlete {0}")]
    AuthExpired(i64),

    #[error("Strava rate limit exceeded")]
    RateLimited,

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Malformed or unexpected upstream payload.
    #[error("Unexpected upstream data: {0}")]
    UpstreamData(String),

    /// A rolling window saw data from after the row being computed.
    #[error("Temporal leakage detected: {0}")]
    LeakageViolation(String),

    #[error("Strava API error: {0}")]
    StravaApi(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a bounded retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited | AppError::TransientNetwork(_))
    }

    /// Whether the error aborts all remaining work for the athlete.
    ///
    /// Per-unit upstream errors are recorded and skipped; these are not.
    pub fn is_stage_fatal(&self) -> bool {
        matches!(
            self,
            AppError::AuthExpired(_)
                | AppError::Database(_)
                | AppError::LeakageViolation(_)
                | AppError::Internal(_)
                | AppError::NotFound(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(format!("Migration failed: {}", err))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::AuthExpired(_) => (
                StatusCode::CONFLICT,
                "auth_expired",
                Some(self.to_string()),
            ),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", None),
            AppError::TransientNetwork(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "transient_network",
                Some(msg.clone()),
            ),
            AppError::UpstreamData(msg) => {
                (StatusCode::BAD_GATEWAY, "upstream_data", Some(msg.clone()))
            }
            AppError::StravaApi(msg) => {
                (StatusCode::BAD_GATEWAY, "strava_error", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::LeakageViolation(msg) => {
                tracing::error!(error = %msg, "Temporal leakage detected");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for services and handlers
pub type Result<T> = std::result::Result<T, AppError>;

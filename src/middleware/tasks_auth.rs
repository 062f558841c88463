// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler authentication middleware.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Require `Authorization: Bearer <scheduler token>` on `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let Some(presented) = presented else {
        tracing::warn!(path = %request.uri().path(), "Blocked tasks request without bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let expected = state.config.scheduler_token.as_bytes();
    let valid = !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected));

    if !valid {
        tracing::warn!(path = %request.uri().path(), "Blocked tasks request with invalid token");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}

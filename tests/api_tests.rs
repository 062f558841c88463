// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Router tests: scheduler authentication and task/API handlers.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{jan, scheduler_auth, summary, TestEnv, ATHLETE_ID};

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, scheduler_auth())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, scheduler_auth())
        .body(Body::empty())
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn env_with_runs() -> TestEnv {
    let env = TestEnv::new().await;
    env.seed_valid_athlete().await;
    env.fake.set_activities(
        (1..=3)
            .map(|i| summary(i, jan(i as u32, 7), 5000.0, 1500))
            .collect(),
    );
    env
}

// ─── Authentication ──────────────────────────────────────────

#[tokio::test]
async fn test_health_needs_no_auth() {
    let env = TestEnv::new().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(env.router(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_tasks_without_token_are_unauthorized() {
    let env = TestEnv::new().await;
    let request = Request::builder()
        .method("POST")
        .uri("/tasks/sync")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"athlete_id": ATHLETE_ID}).to_string()))
        .unwrap();

    let (status, _) = send(env.router(), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(env.fake.list_calls().is_empty());
}

#[tokio::test]
async fn test_tasks_with_wrong_token_are_forbidden() {
    let env = TestEnv::new().await;
    let request = Request::builder()
        .method("POST")
        .uri("/tasks/run-all")
        .header(header::AUTHORIZATION, "Bearer not-the-scheduler")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(env.router(), request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_api_requires_token() {
    let env = TestEnv::new().await;
    let request = Request::builder()
        .uri(format!("/api/athletes/{}/status", ATHLETE_ID))
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(env.router(), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ─── Task handlers ───────────────────────────────────────────

#[tokio::test]
async fn test_run_reports_every_stage() {
    let env = env_with_runs().await;

    let (status, body) = send(
        env.router(),
        post("/tasks/run", json!({"athlete_id": ATHLETE_ID})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["athlete_id"], ATHLETE_ID);
    assert_eq!(body["sync"]["outcome"], "completed");
    assert_eq!(body["sync"]["inserted"], 3);
    assert_eq!(body["enrich"]["outcome"], "completed");
    assert_eq!(body["enrich"]["completed"], 3);
    assert_eq!(body["features"]["outcome"], "completed");
    assert_eq!(body["features"]["rows_written"], 3);
}

#[tokio::test]
async fn test_run_stops_after_failed_stage() {
    let env = TestEnv::new().await;
    env.seed_athlete("expired-access", Duration::hours(-1)).await;
    env.fake.reject_refresh(true);

    let (status, body) = send(
        env.router(),
        post("/tasks/run", json!({"athlete_id": ATHLETE_ID})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["sync"]["outcome"], "failed");
    assert!(body["sync"]["error"]
        .as_str()
        .unwrap()
        .contains("authorization expired"));
    assert_eq!(body["enrich"]["outcome"], "skipped");
    assert_eq!(body["features"]["outcome"], "skipped");
}

#[tokio::test]
async fn test_failed_sync_reports_committed_pages() {
    let env = TestEnv::with_config(|c| c.per_page = 2).await;
    env.seed_valid_athlete().await;
    env.fake.set_activities(
        (1..=3)
            .map(|i| summary(i, jan(i as u32, 7), 5000.0, 1500))
            .collect(),
    );
    env.fake.fail_page(2);

    let (status, body) = send(
        env.router(),
        post("/tasks/run", json!({"athlete_id": ATHLETE_ID})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["sync"]["outcome"], "failed");
    assert_eq!(body["sync"]["partial"]["pages_fetched"], 1);
    assert_eq!(body["sync"]["partial"]["inserted"], 2);
    assert_eq!(
        body["sync"]["partial"]["cursor_after"],
        jan(2, 7).timestamp() - 60
    );
    assert_eq!(body["enrich"]["outcome"], "skipped");
}

#[tokio::test]
async fn test_run_all_covers_registered_athletes() {
    let env = env_with_runs().await;

    let (status, body) = send(env.router(), post("/tasks/run-all", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["athletes"], 1);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["reports"][0]["athlete_id"], ATHLETE_ID);
}

#[tokio::test]
async fn test_stage_endpoints_in_sequence() {
    let env = env_with_runs().await;
    let athlete = json!({"athlete_id": ATHLETE_ID});

    let (status, sync) = send(env.router(), post("/tasks/sync", athlete.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sync["inserted"], 3);

    let (status, enrich) = send(env.router(), post("/tasks/enrich", athlete.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(enrich["completed"], 3);

    let (status, features) = send(
        env.router(),
        post(
            "/tasks/features",
            json!({"athlete_id": ATHLETE_ID, "mode": "full", "as_of": "2024-01-02T12:00:00Z"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(features["mode"], "full");
    assert_eq!(features["rows_written"], 2);

    let (status, train) = send(env.router(), post("/tasks/train", athlete)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(train["scope"]["scope"], "athlete");
    assert_eq!(train["status"], "ok");
    assert_eq!(train["rows_eval"], 1);
}

#[tokio::test]
async fn test_train_without_athlete_is_global() {
    let env = TestEnv::new().await;

    let (status, body) = send(env.router(), post("/tasks/train", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"]["scope"], "global");
    assert_eq!(body["status"], "insufficient_data");
}

#[tokio::test]
async fn test_register_rejects_empty_token() {
    let env = TestEnv::new().await;

    let (status, body) = send(
        env.router(),
        post("/tasks/register", json!({"refresh_token": "  "})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert_eq!(env.fake.refresh_calls(), 0);
}

#[tokio::test]
async fn test_register_then_status() {
    let env = TestEnv::new().await;

    let (status, body) = send(
        env.router(),
        post("/tasks/register", json!({"refresh_token": "fresh-consent"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["athlete_id"], ATHLETE_ID);

    let (status, body) = send(
        env.router(),
        get(&format!("/api/athletes/{}/status", ATHLETE_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_tokens"], true);
    assert_eq!(body["activities"], 0);
    assert_eq!(body["cursor_after"], Value::Null);
}

#[tokio::test]
async fn test_delete_athlete_removes_everything() {
    let env = env_with_runs().await;
    env.state.pipeline.run_athlete(ATHLETE_ID).await;

    let (status, body) = send(
        env.router(),
        post("/tasks/delete-athlete", json!({"athlete_id": ATHLETE_ID})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["rows_deleted"].as_u64().unwrap() > 0);

    let (status, _) = send(
        env.router(),
        get(&format!("/api/athletes/{}/status", ATHLETE_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(env.db().count_activities(ATHLETE_ID).await.unwrap(), 0);
}

// ─── Read API ────────────────────────────────────────────────

#[tokio::test]
async fn test_status_reports_pipeline_progress() {
    let env = env_with_runs().await;
    env.fake.fail_streams(2);
    env.state.pipeline.run_athlete(ATHLETE_ID).await;

    let (status, body) = send(
        env.router(),
        get(&format!("/api/athletes/{}/status", ATHLETE_ID)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["athlete"]["athlete_id"], ATHLETE_ID);
    assert_eq!(body["activities"], 3);
    assert_eq!(body["enrichment"]["complete"], 2);
    assert_eq!(body["enrichment"]["detail_done"], 1);
    assert_eq!(body["enrichment"]["with_errors"], 1);
    assert_eq!(
        body["cursor_after"],
        (jan(3, 7).timestamp() - 60).to_string()
    );
    assert_eq!(body["latest_feature_start"], "2024-01-03T07:00:00Z");
}

#[tokio::test]
async fn test_predictions_filtered_by_version() {
    let env = TestEnv::new().await;
    env.seed_valid_athlete().await;
    env.fake.set_activities(
        (1..=5)
            .map(|i| summary(i, jan(i as u32, 7), 4000.0 + i as f64 * 500.0, 1500))
            .collect(),
    );
    env.state.pipeline.run_athlete(ATHLETE_ID).await;
    env.state
        .pipeline
        .train(pace_pipeline::services::ModelScope::Athlete(ATHLETE_ID))
        .await
        .unwrap();

    let uri = format!("/api/athletes/{}/predictions?model_version=v1", ATHLETE_ID);
    let (status, body) = send(env.router(), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predictions"].as_array().unwrap().len(), 1);
    assert_eq!(body["predictions"][0]["activity_id"], 5);
    assert_eq!(body["predictions"][0]["prediction_type"], "pace");

    let uri = format!("/api/athletes/{}/predictions?model_version=v9", ATHLETE_ID);
    let (_, body) = send(env.router(), get(&uri)).await;
    assert!(body["predictions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_predictions_for_unknown_athlete_is_not_found() {
    let env = TestEnv::new().await;

    let (status, body) = send(env.router(), get("/api/athletes/1/predictions")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

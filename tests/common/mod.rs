// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared integration test helpers: an in-memory store and an in-process
//! fake of the Strava endpoints the pipeline calls.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use pace_pipeline::config::Config;
use pace_pipeline::db::Database;
use pace_pipeline::models::{Athlete, TokenCredential};
use pace_pipeline::routes::create_router;
use pace_pipeline::AppState;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Athlete the fake upstream authenticates as.
#[allow(dead_code)]
pub const ATHLETE_ID: i64 = 4242;

/// Access token seeded as valid for [`ATHLETE_ID`].
#[allow(dead_code)]
pub const SEED_ACCESS_TOKEN: &str = "seed-access";

/// Create an in-memory database with the schema applied.
#[allow(dead_code)]
pub async fn test_db() -> Database {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

/// Midnight UTC on the given day of January 2024, plus `hour` hours.
#[allow(dead_code)]
pub fn jan(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

/// A Strava activity list item.
#[allow(dead_code)]
pub fn summary(id: i64, start: DateTime<Utc>, distance_m: f64, moving_time_s: i64) -> Value {
    json!({
        "id": id,
        "resource_state": 2,
        "athlete": {"id": ATHLETE_ID},
        "name": format!("Activity {}", id),
        "sport_type": "Run",
        "type": "Run",
        "start_date": start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "timezone": "(GMT-08:00) America/Los_Angeles",
        "distance": distance_m,
        "moving_time": moving_time_s,
        "elapsed_time": moving_time_s + 120,
        "total_elevation_gain": distance_m / 100.0,
        "average_heartrate": 150.0,
        "max_heartrate": 172.0,
        "start_latlng": [37.39, -122.15],
        "trainer": false,
        "commute": false
    })
}

// ─── Fake Strava ─────────────────────────────────────────────

/// Behaviour knobs and recorded traffic of the fake upstream.
#[derive(Default)]
pub struct FakeStravaState {
    /// Activities served by the list endpoint (and detail by id)
    pub activities: Mutex<Vec<Value>>,
    /// Access tokens the data endpoints accept
    pub valid_tokens: Mutex<HashSet<String>>,
    /// Every bearer token presented to a data endpoint
    pub bearer_tokens: Mutex<Vec<String>>,
    /// `(after, page)` of every list request
    pub list_calls: Mutex<Vec<(i64, u32)>>,
    pub detail_calls: Mutex<Vec<i64>>,
    pub stream_calls: Mutex<Vec<i64>>,
    pub refresh_calls: AtomicU32,
    /// Reply 400 to refresh requests
    pub reject_refresh: AtomicBool,
    /// Reply 429 to this many upcoming data requests
    pub rate_limit_next: AtomicU32,
    /// List pages that fail with 500
    pub failing_pages: Mutex<HashSet<u32>>,
    /// Activity ids whose detail fails with 500
    pub failing_details: Mutex<HashSet<i64>>,
    /// Activity ids whose streams fail with 500
    pub failing_streams: Mutex<HashSet<i64>>,
}

/// A fake Strava API listening on an ephemeral local port.
pub struct FakeStrava {
    pub addr: SocketAddr,
    pub state: Arc<FakeStravaState>,
}

#[allow(dead_code)]
impl FakeStrava {
    pub async fn start() -> Self {
        let state = Arc::new(FakeStravaState::default());
        let app = Router::new()
            .route("/oauth/token", post(fake_token))
            .route("/api/v3/athlete", get(fake_athlete))
            .route("/api/v3/athlete/activities", get(fake_list))
            .route("/api/v3/activities/{id}", get(fake_detail))
            .route("/api/v3/activities/{id}/streams", get(fake_streams))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake Strava");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake Strava failed");
        });

        Self { addr, state }
    }

    /// Test configuration pointing at this server.
    pub fn config(&self) -> Config {
        Config {
            strava_api_base: format!("http://{}/api/v3", self.addr),
            strava_oauth_url: format!("http://{}/oauth/token", self.addr),
            ..Config::default()
        }
    }

    pub fn set_activities(&self, activities: Vec<Value>) {
        *self.state.activities.lock().unwrap() = activities;
    }

    pub fn push_activity(&self, activity: Value) {
        self.state.activities.lock().unwrap().push(activity);
    }

    pub fn allow_token(&self, token: &str) {
        self.state
            .valid_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn fail_page(&self, page: u32) {
        self.state.failing_pages.lock().unwrap().insert(page);
    }

    pub fn heal_pages(&self) {
        self.state.failing_pages.lock().unwrap().clear();
    }

    pub fn fail_detail(&self, activity_id: i64) {
        self.state.failing_details.lock().unwrap().insert(activity_id);
    }

    pub fn fail_streams(&self, activity_id: i64) {
        self.state.failing_streams.lock().unwrap().insert(activity_id);
    }

    pub fn heal_enrichment(&self) {
        self.state.failing_details.lock().unwrap().clear();
        self.state.failing_streams.lock().unwrap().clear();
    }

    pub fn rate_limit_next(&self, requests: u32) {
        self.state.rate_limit_next.store(requests, Ordering::SeqCst);
    }

    pub fn reject_refresh(&self, reject: bool) {
        self.state.reject_refresh.store(reject, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn bearer_tokens(&self) -> Vec<String> {
        self.state.bearer_tokens.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> Vec<(i64, u32)> {
        self.state.list_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<i64> {
        self.state.detail_calls.lock().unwrap().clone()
    }

    pub fn stream_calls(&self) -> Vec<i64> {
        self.state.stream_calls.lock().unwrap().clone()
    }
}

/// Bearer check shared by the data endpoints: records the token, then
/// applies rate limiting and token validity.
fn authorize(state: &FakeStravaState, headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    state.bearer_tokens.lock().unwrap().push(token.clone());

    let limited = state
        .rate_limit_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if limited {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"message": "Rate Limit Exceeded"})),
        )
            .into_response());
    }

    if !state.valid_tokens.lock().unwrap().contains(&token) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Authorization Error"})),
        )
            .into_response());
    }
    Ok(())
}

fn server_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response()
}

async fn fake_token(
    State(state): State<Arc<FakeStravaState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return (StatusCode::BAD_REQUEST, "unsupported grant").into_response();
    }
    if state.reject_refresh.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": "Bad Request",
                "errors": [{"resource": "RefreshToken", "field": "refresh_token", "code": "invalid"}]
            })),
        )
            .into_response();
    }

    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let access_token = format!("access-{}", n);
    state
        .valid_tokens
        .lock()
        .unwrap()
        .insert(access_token.clone());

    Json(json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "refresh_token": format!("refresh-{}", n),
        "expires_at": (Utc::now() + Duration::hours(6)).timestamp(),
        "expires_in": 21600,
        "athlete": {"id": ATHLETE_ID}
    }))
    .into_response()
}

async fn fake_athlete(State(state): State<Arc<FakeStravaState>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    Json(json!({
        "id": ATHLETE_ID,
        "firstname": "Test",
        "lastname": "Runner",
        "city": "Palo Alto",
        "country": "United States"
    }))
    .into_response()
}

fn start_epoch(activity: &Value) -> Option<i64> {
    activity
        .get("start_date")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}

async fn fake_list(
    State(state): State<Arc<FakeStravaState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let param = |name: &str, default: i64| {
        query
            .get(name)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    };
    let after = param("after", 0);
    let page = param("page", 1).max(1) as u32;
    let per_page = param("per_page", 30).max(1) as usize;

    state.list_calls.lock().unwrap().push((after, page));
    if state.failing_pages.lock().unwrap().contains(&page) {
        return server_error();
    }

    // Items without a parseable start date always pass the filter
    let mut matching: Vec<Value> = state
        .activities
        .lock()
        .unwrap()
        .iter()
        .filter(|a| start_epoch(a).map_or(true, |t| t > after))
        .cloned()
        .collect();
    matching.sort_by_key(start_epoch);

    let items: Vec<Value> = matching
        .into_iter()
        .skip((page as usize - 1) * per_page)
        .take(per_page)
        .collect();
    Json(Value::Array(items)).into_response()
}

async fn fake_detail(
    State(state): State<Arc<FakeStravaState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.detail_calls.lock().unwrap().push(id);
    if state.failing_details.lock().unwrap().contains(&id) {
        return server_error();
    }

    let found = state
        .activities
        .lock()
        .unwrap()
        .iter()
        .find(|a| a.get("id").and_then(Value::as_i64) == Some(id))
        .cloned();

    match found {
        Some(mut detail) => {
            detail["resource_state"] = json!(3);
            detail["description"] = json!("detailed");
            detail["calories"] = json!(420.0);
            Json(detail).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Record Not Found"})),
        )
            .into_response(),
    }
}

async fn fake_streams(
    State(state): State<Arc<FakeStravaState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.stream_calls.lock().unwrap().push(id);
    if state.failing_streams.lock().unwrap().contains(&id) {
        return server_error();
    }

    let series = |data: Value| {
        json!({
            "data": data,
            "series_type": "distance",
            "original_size": 3,
            "resolution": "medium"
        })
    };
    Json(json!({
        "time": series(json!([0, 10, 20])),
        "distance": series(json!([0.0, 31.5, 63.2])),
        "heartrate": series(json!([120, 131, 140]))
    }))
    .into_response()
}

// ─── Application harness ─────────────────────────────────────

/// A wired application against a fresh store and fake upstream.
pub struct TestEnv {
    pub fake: FakeStrava,
    pub state: Arc<AppState>,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build the environment after adjusting the fake-pointing config.
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let fake = FakeStrava::start().await;
        let mut config = fake.config();
        adjust(&mut config);
        let db = test_db().await;
        let state = Arc::new(AppState::new(config, db).expect("Failed to build app state"));
        Self { fake, state }
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Store the athlete with a credential expiring `expires_in` from now.
    pub async fn seed_athlete(&self, access_token: &str, expires_in: Duration) {
        let now = Utc::now();
        self.db()
            .upsert_athlete(&Athlete {
                athlete_id: ATHLETE_ID,
                firstname: Some("Test".to_string()),
                lastname: Some("Runner".to_string()),
                city: None,
                country: None,
                raw_json: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("Failed to seed athlete");

        self.state
            .tokens
            .persist(&TokenCredential {
                athlete_id: ATHLETE_ID,
                access_token: access_token.to_string(),
                refresh_token: "seed-refresh".to_string(),
                expires_at: now + expires_in,
                scope: Some("read,activity:read_all".to_string()),
            })
            .await
            .expect("Failed to seed tokens");
    }

    /// Seed the athlete with a long-lived credential the fake accepts.
    pub async fn seed_valid_athlete(&self) {
        self.fake.allow_token(SEED_ACCESS_TOKEN);
        self.seed_athlete(SEED_ACCESS_TOKEN, Duration::hours(6))
            .await;
    }
}

/// Authorization header value for the test scheduler token.
#[allow(dead_code)]
pub fn scheduler_auth() -> String {
    format!("Bearer {}", Config::default().scheduler_token)
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Enrichment state machine against the fake upstream.

use chrono::{Duration, Utc};
use pace_pipeline::error::AppError;
use pace_pipeline::models::{ActivityRecord, EnrichmentState, PayloadKind};

mod common;
use common::{jan, summary, TestEnv, ATHLETE_ID};

async fn synced_env(count: i64) -> TestEnv {
    synced_env_with(count, |_| {}).await
}

async fn synced_env_with(
    count: i64,
    adjust: impl FnOnce(&mut pace_pipeline::config::Config),
) -> TestEnv {
    let env = TestEnv::with_config(adjust).await;
    env.seed_valid_athlete().await;
    env.fake.set_activities(
        (1..=count)
            .map(|i| summary(i, jan(i as u32, 7), 5000.0, 1500))
            .collect(),
    );
    env.state.pipeline.sync(ATHLETE_ID).await.unwrap();
    env
}

async fn state_of(env: &TestEnv, activity_id: i64) -> EnrichmentState {
    let status = env.db().get_enrichment_status(activity_id).await.unwrap();
    EnrichmentState::of(status.as_ref())
}

#[tokio::test]
async fn test_enrich_advances_every_activity_to_complete() {
    let env = synced_env(3).await;

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.selected, 3);
    assert_eq!(report.details_fetched, 3);
    assert_eq!(report.streams_fetched, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 0);

    for id in 1..=3 {
        assert_eq!(state_of(&env, id).await, EnrichmentState::Complete);
        let streams = env.db().list_streams(id).await.unwrap();
        let types: Vec<_> = streams.iter().map(|s| s.stream_type.as_str()).collect();
        assert_eq!(types, vec!["distance", "heartrate", "time"]);
        assert_eq!(streams[0].resolution, "medium");
    }

    let counts = env.db().enrichment_counts(ATHLETE_ID).await.unwrap();
    assert_eq!(counts.complete, 3);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn test_complete_activities_are_never_refetched() {
    let env = synced_env(2).await;
    env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    let details_before = env.fake.detail_calls().len();

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.selected, 0);
    assert_eq!(env.fake.detail_calls().len(), details_before);
}

#[tokio::test]
async fn test_detail_failure_is_isolated_and_recorded() {
    let env = synced_env(3).await;
    env.fake.fail_detail(2);

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(state_of(&env, 1).await, EnrichmentState::Complete);
    assert_eq!(state_of(&env, 3).await, EnrichmentState::Complete);

    let status = env.db().get_enrichment_status(2).await.unwrap().unwrap();
    assert_eq!(status.state(), EnrichmentState::Pending);
    assert_eq!(status.attempts, 1);
    assert!(status.last_error.is_some());
    assert!(status.detail_fetched_at.is_none());

    let counts = env.db().enrichment_counts(ATHLETE_ID).await.unwrap();
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.with_errors, 1);
}

#[tokio::test]
async fn test_failed_activity_is_retried_next_pass() {
    let env = synced_env(3).await;
    env.fake.fail_detail(2);
    env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    let status = env.db().get_enrichment_status(2).await.unwrap().unwrap();
    assert_eq!(status.attempts, 2);

    env.fake.heal_enrichment();
    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.selected, 1);
    assert_eq!(report.completed, 1);
    let status = env.db().get_enrichment_status(2).await.unwrap().unwrap();
    assert_eq!(status.state(), EnrichmentState::Complete);
    assert_eq!(status.attempts, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_stream_failure_keeps_detail_and_resumes_at_streams() {
    let env = synced_env(2).await;
    env.fake.fail_streams(1);

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(state_of(&env, 1).await, EnrichmentState::DetailDone);

    let detail_calls_for_1 = || env.fake.detail_calls().iter().filter(|id| **id == 1).count();
    assert_eq!(detail_calls_for_1(), 1);

    env.fake.heal_enrichment();
    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.details_fetched, 0);
    assert_eq!(report.streams_fetched, 1);
    assert_eq!(state_of(&env, 1).await, EnrichmentState::Complete);
    assert_eq!(detail_calls_for_1(), 1);
}

#[tokio::test]
async fn test_missing_upstream_activity_does_not_block_siblings() {
    let env = synced_env(2).await;

    // Known locally, deleted upstream
    let gone = summary(77, jan(1, 5), 3000.0, 900);
    let record = ActivityRecord::from_payload(ATHLETE_ID, &gone, PayloadKind::Summary).unwrap();
    env.db()
        .upsert_activity_page(&[record], Utc::now())
        .await
        .unwrap();

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.selected, 3);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    let status = env.db().get_enrichment_status(77).await.unwrap().unwrap();
    assert!(status.last_error.unwrap().contains("404"));
}

#[tokio::test]
async fn test_exhausted_rate_limit_defers_rest_of_batch() {
    let env = synced_env(3).await;
    // Enough 429s to exhaust the retry budget of the first request
    env.fake.rate_limit_next(3);

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.completed, 0);
    assert!(env.fake.detail_calls().is_empty());
    assert!(env.db().get_enrichment_status(2).await.unwrap().is_none());

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    assert_eq!(report.completed, 3);
}

#[tokio::test]
async fn test_batch_is_bounded_and_oldest_first() {
    let env = synced_env_with(4, |c| c.enrich_batch_size = 2).await;

    let report = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();

    assert_eq!(report.selected, 2);
    assert_eq!(env.fake.detail_calls(), vec![1, 2]);
    assert_eq!(state_of(&env, 3).await, EnrichmentState::Pending);
}

#[tokio::test]
async fn test_failing_activities_do_not_starve_newer_ones() {
    let env = synced_env_with(3, |c| c.enrich_batch_size = 2).await;
    env.fake.fail_detail(1);
    env.fake.fail_detail(2);
    // Retries of one request collapse into a single visit
    let visits = || {
        let mut calls = env.fake.detail_calls();
        calls.dedup();
        calls
    };

    let first = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    assert_eq!(first.failed, 2);
    assert_eq!(visits(), vec![1, 2]);

    // Untried activity 3 goes ahead of the two that already failed
    let second = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(state_of(&env, 3).await, EnrichmentState::Complete);
    assert_eq!(visits(), vec![1, 2, 3, 1]);

    // Fewest attempts first among the failed ones
    env.state.pipeline.enrich(ATHLETE_ID).await.unwrap();
    assert_eq!(visits(), vec![1, 2, 3, 1, 2, 1]);
    assert_eq!(state_of(&env, 1).await, EnrichmentState::Pending);
    assert_eq!(state_of(&env, 2).await, EnrichmentState::Pending);
}

#[tokio::test]
async fn test_revoked_access_aborts_the_pass() {
    let env = TestEnv::new().await;
    // Not expired locally, but the upstream no longer accepts it
    env.seed_athlete("revoked-access", Duration::hours(6)).await;
    let record = ActivityRecord::from_payload(
        ATHLETE_ID,
        &summary(1, jan(1, 7), 5000.0, 1500),
        PayloadKind::Summary,
    )
    .unwrap();
    env.db()
        .upsert_activity_page(&[record], Utc::now())
        .await
        .unwrap();

    let err = env.state.pipeline.enrich(ATHLETE_ID).await.unwrap_err();

    assert!(matches!(err, AppError::AuthExpired(id) if id == ATHLETE_ID));
    assert!(env.db().get_enrichment_status(1).await.unwrap().is_none());
}

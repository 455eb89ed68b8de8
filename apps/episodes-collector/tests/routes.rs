//! Route tests for the collector
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use episodes_collector::{router, AppState};
use http_body_util::BodyExt;
use proptest::prelude::*;
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(state: Arc<AppState>) -> Router {
    router(state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_health() {
    let state = Arc::new(AppState::new(10, 10).unwrap());
    let (status, body) = get(app_with(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_beacon_is_recorded() {
    let state = Arc::new(AppState::new(10, 10).unwrap());

    let (status, body) = get(
        app_with(state.clone()),
        "/beacon?ets=backend:120,frontend:300,totaltime:420",
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    get(app_with(state.clone()), "/beacon?ets=backend:80").await;

    let (status, body) = get(app_with(state), "/api/episodes").await;
    assert_eq!(status, StatusCode::OK);

    let summaries: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0]["name"], "backend");
    assert_eq!(summaries[0]["count"], 2);
    assert_eq!(summaries[0]["min"], 80);
    assert_eq!(summaries[0]["max"], 120);
    assert_eq!(summaries[0]["mean"], 100.0);
}

#[tokio::test]
async fn test_empty_beacon_is_rejected() {
    let state = Arc::new(AppState::new(10, 10).unwrap());

    for uri in ["/beacon", "/beacon?ets=", "/beacon?ets=garbage", "/beacon?v=1"] {
        let (status, body) = get(app_with(state.clone()), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);

        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["status"], 400);
    }

    let (_, body) = get(app_with(state), "/api/episodes").await;
    assert_eq!(body, b"[]");
}

#[tokio::test]
async fn test_extreme_durations_are_summarized() {
    let state = Arc::new(AppState::new(10, 10).unwrap());
    let max = i64::MAX;

    for _ in 0..2 {
        let (status, _) = get(app_with(state.clone()), &format!("/beacon?ets=huge:{}", max)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, body) = get(app_with(state), "/api/episodes").await;
    assert_eq!(status, StatusCode::OK);

    let summaries: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(summaries[0]["count"], 2);
    assert_eq!(summaries[0]["max"], max);
    assert_eq!(summaries[0]["mean"], max as f64);
}

#[tokio::test]
async fn test_episode_table_is_bounded() {
    let state = Arc::new(AppState::new(10, 3).unwrap());

    for i in 0..10 {
        let (status, _) = get(app_with(state.clone()), &format!("/beacon?ets=random{}:1", i)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (_, body) = get(app_with(state), "/api/episodes").await;
    let summaries: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(summaries.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_route() {
    let state = Arc::new(AppState::new(10, 10).unwrap());
    let (status, _) = get(app_with(state), "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: the store never holds more than the configured samples per episode
    #[test]
    fn sample_count_is_capped(cap in 1usize..20, beacons in 1usize..60) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let state = AppState::new(cap, 4).unwrap();

        let summaries = runtime.block_on(async {
            for i in 0..beacons {
                state.record(&[("episode".to_string(), i as i64)]).await;
            }
            state.summaries().await
        });

        prop_assert_eq!(summaries.len(), 1);
        prop_assert_eq!(summaries[0].count, beacons.min(cap));
        prop_assert_eq!(summaries[0].max, beacons as i64 - 1);
    }

    /// Property: the store never tracks more than the configured episode names
    #[test]
    fn episode_count_is_capped(cap in 1usize..10, names in prop::collection::vec("[a-z]{1,6}", 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let state = AppState::new(5, cap).unwrap();

        let summaries = runtime.block_on(async {
            for name in &names {
                state.record(&[(name.clone(), 1)]).await;
            }
            state.summaries().await
        });

        let distinct: std::collections::BTreeSet<&String> = names.iter().collect();
        prop_assert_eq!(summaries.len(), distinct.len().min(cap));
    }
}

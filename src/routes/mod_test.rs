use axum::body::{Body, to_bytes};
use axum::http::Request;
use axum::http::header::AUTHORIZATION;
use tower::ServiceExt;

use super::*;
use crate::state::test_helpers::*;

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz_is_public() {
    let (state, stub) = test_app_state();
    let resp = app(state).oneshot(get_req("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(stub.seen().is_empty(), "public routes skip the gate");
}

#[tokio::test]
async fn api_me_requires_token() {
    let (state, _) = test_app_state();
    let resp = app(state).oneshot(get_req("/api/me")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_me_returns_verified_uid() {
    let (state, _) = test_app_state();
    let req = Request::builder()
        .uri("/api/me")
        .header(AUTHORIZATION, format!("Bearer {VALID_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["uid"], VALID_UID);
}

#[tokio::test]
async fn readyz_without_database_is_unavailable() {
    let (state, _) = test_app_state();
    let resp = app(state).oneshot(get_req("/readyz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (state, _) = test_app_state();
    let resp = app(state).oneshot(get_req("/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

//! REST surface tests against the in-memory stores; no database required.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use recondor_core::campaign::{CampaignService, CampaignStore};
use recondor_core::events::EventBroadcaster;
use recondor_core::memory::InMemoryArena;
use recondor_core::orchestration::{InMemoryJobStore, LeaseConfig, RetryConfig};
use recondor_core::results::ResultStore;
use recondor_server::create_app;
use recondor_server::infra::AppState;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn test_app() -> Router {
    let arena = Arc::new(InMemoryArena::new());
    let jobs = Arc::new(InMemoryJobStore::new(
        RetryConfig::default(),
        LeaseConfig::default(),
    ));
    let events = Arc::new(EventBroadcaster::default());
    let service = Arc::new(CampaignService::new(
        Arc::clone(&arena) as Arc<dyn CampaignStore>,
        jobs,
        Arc::clone(&events),
        3,
    ));
    create_app(AppState::new(
        service,
        arena as Arc<dyn ResultStore>,
        events,
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn generation_request() -> Value {
    json!({
        "name": "shop sweep",
        "patternType": "prefix",
        "variableLength": 2,
        "characterSet": "ab",
        "constantString": "shop",
        "tld": "com"
    })
}

#[tokio::test]
async fn ping_reports_ok() {
    let app = test_app();
    let response = app.oneshot(get("/ping")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn generation_campaign_create_and_fetch() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(post_json("/api/campaigns/generation", generation_request()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["campaign_type"], "domain_generation");
    assert_eq!(created["total_items"], 4);

    let id = created["id"].as_str().expect("campaign id").to_string();
    let response = app
        .oneshot(get(&format!("/api/campaigns/{id}")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"], created["id"]);
}

#[tokio::test]
async fn start_moves_a_pending_campaign_to_queued() {
    let app = test_app();
    let created = body_json(
        app.clone()
            .oneshot(post_json("/api/campaigns/generation", generation_request()))
            .await
            .expect("response"),
    )
    .await;
    let id = created["id"].as_str().expect("campaign id").to_string();

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/campaigns/{id}/start"), json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let started = body_json(response).await;
    assert_eq!(started["status"], "queued");

    let response = app
        .oneshot(get(&format!("/api/campaigns/{id}/status")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["activeJobs"], 1);
}

#[tokio::test]
async fn invalid_generation_request_is_rejected() {
    let app = test_app();
    let mut request = generation_request();
    request["characterSet"] = json!("");

    let response = app
        .oneshot(post_json("/api/campaigns/generation", request))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], 400);
}

#[tokio::test]
async fn unknown_campaign_is_a_structured_404() {
    let app = test_app();
    let response = app
        .oneshot(get(&format!(
            "/api/campaigns/{}",
            uuid::Uuid::new_v4()
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], 404);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn list_rejects_unknown_status_filter() {
    let app = test_app();
    let response = app
        .oneshot(get("/api/campaigns?status=bogus"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pause_before_start_is_a_conflict() {
    let app = test_app();
    let created = body_json(
        app.clone()
            .oneshot(post_json("/api/campaigns/generation", generation_request()))
            .await
            .expect("response"),
    )
    .await;
    let id = created["id"].as_str().expect("campaign id").to_string();

    let response = app
        .oneshot(post_json(&format!("/api/campaigns/{id}/pause"), json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_removes_the_campaign() {
    let app = test_app();
    let created = body_json(
        app.clone()
            .oneshot(post_json("/api/campaigns/generation", generation_request()))
            .await
            .expect("response"),
    )
    .await;
    let id = created["id"].as_str().expect("campaign id").to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/campaigns/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/api/campaigns/{id}")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

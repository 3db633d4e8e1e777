//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use tower::ServiceExt;

use kiosk_concierge::api::{self, ApiState};
use kiosk_concierge::customer::{IdentityRecord, TurnRecord};
use kiosk_concierge::orchestrator::{Collaborators, OrchestratorSettings};
use kiosk_concierge::turn::ResponseService;
use kiosk_concierge::{CustomerStore, MemoryStore, Orchestrator};

mod common;
use common::{ScriptedResponder, descriptor};

/// Build a test API router over an orchestrator that is not running
fn build_test_router(store: Arc<dyn CustomerStore>) -> (axum::Router, Orchestrator) {
    let responder: Arc<dyn ResponseService> = Arc::new(ScriptedResponder::new("ok"));
    let collaborators = Collaborators {
        store: Arc::clone(&store),
        camera: None,
        analyzer: None,
        recognizer: None,
        output: None,
        responder,
        microphone: None,
    };
    let (orchestrator, handle) = Orchestrator::new(collaborators, OrchestratorSettings::default());
    let router = api::router(Arc::new(ApiState { handle, store }));
    (router, orchestrator)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn known_customer(id: &str, turns: usize) -> IdentityRecord {
    let conversations = (0..turns)
        .map(|i| TurnRecord {
            user_text: format!("sual {i}"),
            assistant_text: format!("cavab {i}"),
            timestamp: Utc::now(),
        })
        .collect();
    IdentityRecord::from_parts(id.to_string(), descriptor(0.1), Utc::now(), conversations)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _orchestrator) = build_test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_ready_reports_degraded_storage() {
    let (app, _orchestrator) = build_test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["storage"]["status"], "degraded");
}

#[tokio::test]
async fn test_ready_fails_when_orchestrator_gone() {
    let (app, orchestrator) = build_test_router(Arc::new(MemoryStore::new()));
    drop(orchestrator);

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_state_endpoint_returns_snapshot() {
    let (app, _orchestrator) = build_test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(Request::builder().uri("/api/state").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["mode"], "idle");
    assert!(json["customer_id"].is_null());
    assert_eq!(json["is_new_customer"], false);
}

#[tokio::test]
async fn test_listen_trigger() {
    let (app, _orchestrator) = build_test_router(Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/listen")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_listen_trigger_unavailable_after_shutdown() {
    let (app, orchestrator) = build_test_router(Arc::new(MemoryStore::new()));
    drop(orchestrator);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/listen")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_customer_list_and_detail() {
    let store = Arc::new(MemoryStore::with_records(vec![
        known_customer("cust-a", 2),
        known_customer("cust-b", 0),
    ]));
    let (app, _orchestrator) = build_test_router(store);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/customers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["customers"].as_array().unwrap().len(), 2);
    assert_eq!(json["volatile"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/customers/cust-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], "cust-a");
    assert_eq!(json["turns"], 2);
    assert_eq!(json["conversations"][1]["assistant_text"], "cavab 1");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/customers/nobody")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

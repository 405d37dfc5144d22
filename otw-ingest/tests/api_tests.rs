//! HTTP API integration tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use otw_ingest::db;
use otw_ingest::fetcher::IncidentFetcher;
use otw_ingest::filter::AreaFilter;
use otw_ingest::hub::{spawn_dispatcher, FanoutHub};
use otw_ingest::notifier::{ChannelNotifier, Notifier};
use otw_ingest::pipeline::Pipeline;
use otw_ingest::retry::RetryPolicy;
use otw_ingest::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// State whose pipeline publishes into the hub, with an unreachable upstream
async fn test_app_state() -> AppState {
    let hub = FanoutHub::new(8);
    let (tx, rx) = mpsc::channel(8);
    spawn_dispatcher(hub.clone(), rx);

    let fetcher = IncidentFetcher::new(
        "http://127.0.0.1:9/unreachable",
        Duration::from_millis(200),
        RetryPolicy::new(1, Duration::from_millis(1)),
    )
    .unwrap();
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(ChannelNotifier::new(tx))];
    let pipeline = Pipeline::new(
        fetcher,
        db::connect_in_memory().await.unwrap(),
        AreaFilter::default(),
        notifiers,
    );

    AppState::new(Arc::new(pipeline), hub, Duration::from_secs(1))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn canonical(id: &str) -> Value {
    json!({
        "id": id,
        "eventType": "COLLISION",
        "location": "Hunt Club Rd",
        "priority": "HIGH",
        "status": "ACTIVE",
        "geoCoordinates": [-75.68, 45.35]
    })
}

#[tokio::test]
async fn test_health_reports_module_and_clients() {
    let state = test_app_state().await;
    let _client = state.hub.register().await;
    let app = build_router(state);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "otw-ingest");
    assert_eq!(body["clients"], 1);
}

#[tokio::test]
async fn test_broadcast_rejects_malformed_payload_without_pushing() {
    let state = test_app_state().await;
    let mut client = state.hub.register().await;
    let app = build_router(state);

    for payload in [
        json!({}),
        json!({ "events": "nope" }),
        json!({ "events": [{ "location": "no id" }] }),
    ] {
        let response = app
            .clone()
            .oneshot(post_json("/broadcast", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    assert!(client.frames.try_recv().is_err());
}

#[tokio::test]
async fn test_broadcast_reaches_registered_clients() {
    let state = test_app_state().await;
    let mut first = state.hub.register().await;
    let mut second = state.hub.register().await;
    let app = build_router(state);

    let response = app
        .oneshot(post_json("/broadcast", json!({ "events": [canonical("X1")] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "sent", "clients": 2 }));

    assert_eq!(first.frames.recv().await.unwrap().events[0].id, "X1");
    assert_eq!(second.frames.recv().await.unwrap().events[0].id, "X1");
}

#[tokio::test]
async fn test_sse_client_receives_broadcast_frame() {
    let state = test_app_state().await;
    let app = build_router(state);

    let response = app.clone().oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();

    let broadcast = app
        .oneshot(post_json("/broadcast", json!({ "events": [canonical("S1")] })))
        .await
        .unwrap();
    assert_eq!(json_body(broadcast).await["clients"], 1);

    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: traffic"));
    assert!(text.contains(r#""id":"S1""#));
}

#[tokio::test]
async fn test_ingest_runs_cycle_and_pushes_to_clients() {
    let state = test_app_state().await;
    let mut client = state.hub.register().await;
    let app = build_router(state);

    let snapshot = json!({
        "events": [{
            "id": 4242,
            "eventType": "CONSTRUCTION",
            "headline": "Lane closure, Carling Ave",
            "schedule": [{ "startDateTime": "2025-10-21T14:00:00Z", "endDateTime": null }]
        }]
    });

    let response = app
        .clone()
        .oneshot(post_json("/api/ingest", snapshot.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["changed"], true);
    assert_eq!(report["inserted"], 1);

    let frame = tokio::time::timeout(Duration::from_secs(2), client.frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.events[0].id, "4242");
    assert_eq!(frame.events[0].location, "Lane closure, Carling Ave");

    // Identical snapshot: 200, nothing pushed
    let response = app
        .clone()
        .oneshot(post_json("/api/ingest", snapshot))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["changed"], false);

    let response = app.oneshot(get("/api/incidents/4242")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = json_body(response).await;
    assert_eq!(record["status"], "ACTIVE");
    assert_eq!(record["startTime"], "2025-10-21T14:00:00Z");

    assert!(client.frames.try_recv().is_err());
}

#[tokio::test]
async fn test_ingest_rejects_missing_events() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(post_json("/api/ingest", json!({ "incidents": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cycle_against_unreachable_upstream_is_500() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cycle")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"]["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_incident_queries() {
    let app = build_router(test_app_state().await);

    let snapshot = json!({
        "events": [
            { "id": "A", "priority": "HIGH", "location": { "description": "Bank St" } },
            { "id": "B", "priority": "LOW", "location": { "description": "Elgin St" } }
        ]
    });
    app.clone()
        .oneshot(post_json("/api/ingest", snapshot))
        .await
        .unwrap();
    app.clone()
        .oneshot(post_json(
            "/api/ingest",
            json!({ "events": [{ "id": "A", "priority": "HIGH", "location": { "description": "Bank St" } }] }),
        ))
        .await
        .unwrap();

    let all = json_body(app.clone().oneshot(get("/api/incidents")).await.unwrap()).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let inactive = json_body(
        app.clone()
            .oneshot(get("/api/incidents?status=INACTIVE"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(inactive.as_array().unwrap().len(), 1);
    assert_eq!(inactive[0]["id"], "B");

    let bad = app
        .clone()
        .oneshot(get("/api/incidents?status=GONE"))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let missing = app.oneshot(get("/api/incidents/nope")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notifications_endpoint_fans_out_envelopes() {
    let state = test_app_state().await;
    let mut client = state.hub.register().await;
    let app = build_router(state);

    let envelopes = json!([
        {
            "id": "0b6f2a6e-1d7c-4a55-9a53-2f5d0f6f6b11",
            "eventType": "Traffic.Ingested",
            "subject": "traffic/ingestion",
            "eventTime": "2025-10-21T14:00:00Z",
            "data": { "events": [canonical("N1")] },
            "dataVersion": "1.0",
            "metadataVersion": "1"
        },
        {
            "id": "7e0d3c0a-0f0b-4c43-8f8e-1f0a8d3c2b22",
            "eventType": "Something.Else",
            "subject": "other",
            "eventTime": "2025-10-21T14:00:00Z",
            "data": { "events": [] }
        }
    ]);

    let response = app
        .oneshot(post_json("/api/notifications", envelopes))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["broadcasts"], 1);
    assert_eq!(body["ignored"], 1);

    assert_eq!(client.frames.recv().await.unwrap().events[0].id, "N1");
    assert!(client.frames.try_recv().is_err());
}

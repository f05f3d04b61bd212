// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::Harness;
use axum::http::StatusCode;
use axum_test::TestServer;
use jobrelay::domain::models::lane::LaneTable;
use jobrelay::domain::repositories::job_repository::JobRepository;
use jobrelay::handlers::{HandlerError, HandlerRegistry};
use jobrelay::presentation::middleware::auth_middleware::AuthState;
use jobrelay::presentation::routes::{self, AdminServices};
use jobrelay::queue::immediate::ImmediateDelivery;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TOKEN: &str = "admin-token";

async fn create_test_app() -> (TestServer, Harness) {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("email.send", |_job| async { Ok(()) });
    registry.register_fn("calendar.push_event", |_job| async {
        Err(HandlerError::transient("calendar unavailable"))
    });
    let harness = Harness::new(LaneTable::builtin(), registry).await;

    let immediate = ImmediateDelivery::new(
        harness.queue.clone(),
        harness.registry.clone(),
        Duration::from_secs(5),
    );
    let app = routes::app(AdminServices {
        queue: Arc::new(harness.queue.clone()),
        immediate: Arc::new(immediate),
        dispatcher: harness.dispatcher.clone(),
        jobs: harness.jobs.clone(),
        auth: AuthState::new(Some(TOKEN.to_string())),
    });

    (TestServer::new(app).unwrap(), harness)
}

async fn enqueue(server: &TestServer, body: Value) -> Uuid {
    let response = server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&body)
        .await;
    response.assert_status(StatusCode::CREATED);
    let value: Value = response.json();
    value["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let (server, _harness) = create_test_app().await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");

    server.get("/v1/version").await.assert_status_ok();
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let (server, _harness) = create_test_app().await;

    server
        .post("/v1/jobs")
        .json(&json!({ "kind": "email.send" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .get(&format!("/v1/jobs/{}", Uuid::new_v4()))
        .authorization_bearer("wrong")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enqueue_and_duplicate() {
    let (server, _harness) = create_test_app().await;
    let body = json!({
        "kind": "email.send",
        "parent_type": "newsletter",
        "parent_id": "42",
        "payload": { "to": "a@example.com" },
        "dedup_key": "newsletter:42:a@example.com"
    });

    let id = enqueue(&server, body.clone()).await;

    let response = server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&body)
        .await;
    response.assert_status_ok();
    let value: Value = response.json();
    assert_eq!(value["result"], "already_scheduled");
    assert_eq!(value["id"], id.to_string());
}

#[tokio::test]
async fn test_enqueue_validation() {
    let (server, _harness) = create_test_app().await;

    server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&json!({ "kind": "" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&json!({ "kind": "email.send", "parent_type": "newsletter" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&json!({ "kind": "email.send", "max_attempts": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&json!({ "kind": "email.send", "payload_base64": "%%%" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_job() {
    let (server, _harness) = create_test_app().await;

    server
        .get(&format!("/v1/jobs/{}", Uuid::new_v4()))
        .authorization_bearer(TOKEN)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let id = enqueue(
        &server,
        json!({ "kind": "email.send", "payload_base64": "aGVsbG8=" }),
    )
    .await;

    let response = server
        .get(&format!("/v1/jobs/{}", id))
        .authorization_bearer(TOKEN)
        .await;
    response.assert_status_ok();
    let job: Value = response.json();
    assert_eq!(job["lane"], "email");
    assert_eq!(job["status"], "pending");
    assert_eq!(job["payload_base64"], "aGVsbG8=");
    assert_eq!(job["max_attempts"], 3);
}

#[tokio::test]
async fn test_cancel_job() {
    let (server, _harness) = create_test_app().await;
    let id = enqueue(&server, json!({ "kind": "email.send" })).await;

    let response = server
        .delete(&format!("/v1/jobs/{}", id))
        .authorization_bearer(TOKEN)
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "id": id, "cancelled": true }));

    server
        .delete(&format!("/v1/jobs/{}", id))
        .authorization_bearer(TOKEN)
        .await
        .assert_status(StatusCode::CONFLICT);

    server
        .delete(&format!("/v1/jobs/{}", Uuid::new_v4()))
        .authorization_bearer(TOKEN)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tick_all_lanes_and_parent_status() {
    let (server, _harness) = create_test_app().await;
    for i in 0..3 {
        enqueue(
            &server,
            json!({
                "kind": "email.send",
                "parent_type": "newsletter",
                "parent_id": "7",
                "payload": { "n": i }
            }),
        )
        .await;
    }

    let response = server
        .post("/v1/lanes/*/tick")
        .authorization_bearer(TOKEN)
        .await;
    response.assert_status_ok();
    let reports: Vec<Value> = response.json();
    let lanes: Vec<&str> = reports.iter().map(|r| r["lane"].as_str().unwrap()).collect();
    assert_eq!(lanes, vec!["email", "newsletter", "default"]);
    assert_eq!(reports[0]["completed"], 3);

    let response = server
        .get("/v1/parents/newsletter/7/status")
        .authorization_bearer(TOKEN)
        .await;
    response.assert_status_ok();
    let status: Value = response.json();
    assert_eq!(status["total"], 3);
    assert_eq!(status["completed"], 3);
    assert_eq!(status["finalized"], true);
}

#[tokio::test]
async fn test_immediate_enqueue() {
    let (server, harness) = create_test_app().await;

    let response = server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&json!({ "kind": "email.send", "immediate": true }))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "outcome": "delivered" }));

    let response = server
        .post("/v1/jobs")
        .authorization_bearer(TOKEN)
        .json(&json!({ "kind": "calendar.push_event", "immediate": true }))
        .await;
    response.assert_status_ok();
    let value: Value = response.json();
    assert_eq!(value["outcome"], "queued");

    let id: Uuid = value["id"].as_str().unwrap().parse().unwrap();
    let job = harness.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.lane, "default");
}

#[tokio::test]
async fn test_purge_jobs() {
    let (server, _harness) = create_test_app().await;
    let id = enqueue(&server, json!({ "kind": "email.send" })).await;
    server
        .delete(&format!("/v1/jobs/{}", id))
        .authorization_bearer(TOKEN)
        .await
        .assert_status_ok();

    let response = server
        .post("/v1/jobs/purge")
        .authorization_bearer(TOKEN)
        .json(&json!({ "older_than_days": 0 }))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "purged": 1 }));

    server
        .get(&format!("/v1/jobs/{}", id))
        .authorization_bearer(TOKEN)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tick_unknown_lane_is_not_found() {
    let (server, _harness) = create_test_app().await;

    server
        .post("/v1/lanes/no-such-lane/tick")
        .authorization_bearer(TOKEN)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let response = server
        .post("/v1/lanes/default/tick")
        .authorization_bearer(TOKEN)
        .await;
    response.assert_status_ok();
    let reports: Vec<Value> = response.json();
    assert_eq!(reports[0]["lane"], "default");
}

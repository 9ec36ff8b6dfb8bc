use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;

use crate::allocation::router::{error_response, submit_handler};
use crate::allocation::{QuotaAllocationService, RepositoryError, ServiceError, TierLevel};
use crate::config::QuotaParameters;

fn post_json(uri: &str, payload: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(payload).expect("serialize payload"),
        ))
        .expect("request")
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

fn mason_payload(count: u32) -> Value {
    json!({
        "nationality": "EGY",
        "profession": "MASON",
        "establishment": "EST-MID",
        "requested_count": count,
    })
}

#[tokio::test]
async fn submit_route_creates_decided_requests() {
    let fixture = fixture(mason_roster(500));
    let response = router(&fixture)
        .oneshot(post_json("/api/v1/requests", &mason_payload(6)))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json_body(response).await;
    assert_eq!(body["request"]["status"], "APPROVED");
    assert_eq!(body["decision"]["decision"], "APPROVED");
    assert_eq!(body["decision"]["approved_count"], 6);
    assert_eq!(body["decision"]["tier_level"], 4);
    assert!(body.get("queue_entry").is_none());
}

#[tokio::test]
async fn queued_submission_returns_its_queue_entry() {
    let fixture = fixture(mason_roster(60));
    seed_demand(&fixture.store);
    let response = router(&fixture)
        .oneshot(post_json("/api/v1/requests", &mason_payload(20)))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json_body(response).await;
    assert_eq!(body["decision"]["decision"], "QUEUED");
    assert_eq!(body["decision"]["queued_count"], 20);
    assert_eq!(body["queue_entry"]["tier"], 2);
    assert_eq!(body["queue_entry"]["position"], 1);
}

#[tokio::test]
async fn unrestricted_nationality_is_unprocessable() {
    let fixture = fixture(mason_roster(500));
    let payload = json!({
        "nationality": "SAU",
        "profession": "MASON",
        "establishment": "EST-MID",
        "requested_count": 2,
    });
    let response = router(&fixture)
        .oneshot(post_json("/api/v1/requests", &payload))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("SAU"));
}

#[tokio::test]
async fn missing_cap_is_reported_as_conflict() {
    let fixture = fixture(MemoryRoster::with(vec![cap("IND", 100)], Vec::new()));
    let response = router(&fixture)
        .oneshot(post_json("/api/v1/requests", &mason_payload(2)))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json_body(response).await;
    assert_eq!(body["nationality"], "EGY");
    assert_eq!(body["year"], 2025);
}

#[tokio::test]
async fn full_queue_is_reported_as_conflict() {
    let mut parameters = QuotaParameters::default();
    parameters.queue.max_queue_per_tier = 1;
    let fixture = fixture_with(mason_roster(60), &parameters);
    seed_demand(&fixture.store);
    let app = router(&fixture);

    let first = app
        .clone()
        .oneshot(post_json("/api/v1/requests", &mason_payload(3)))
        .await
        .expect("router response");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(post_json("/api/v1/requests", &mason_payload(3)))
        .await
        .expect("router response");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = read_json_body(second).await;
    assert_eq!(body["max_queue_per_tier"], 1);
    assert_eq!(body["tier"], 2);
}

#[tokio::test]
async fn eligibility_route_is_a_dry_run() {
    let fixture = fixture(mason_roster(500));
    let response = router(&fixture)
        .oneshot(post_json(
            "/api/v1/requests/check-eligibility",
            &mason_payload(4),
        ))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["decision"], "APPROVED");
    assert_eq!(fixture.store.log_count(), 0);
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let fixture = fixture(mason_roster(500));
    let response = router(&fixture)
        .oneshot(get("/api/v1/requests/req-missing"))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json_body(response).await;
    assert_eq!(body["request_id"], "req-missing");
}

#[tokio::test]
async fn decision_history_route_lists_logs() {
    let fixture = fixture(mason_roster(500));
    let processed = fixture
        .service
        .process_request(submission("EGY", "MASON", "EST-MID", 2))
        .expect("request processed");

    let response = router(&fixture)
        .oneshot(get(&format!(
            "/api/v1/requests/{}/decisions",
            processed.request.id
        )))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    let logs = body.as_array().expect("log array");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["rule_chain"][0]["rule"], "tier_identification");
}

#[tokio::test]
async fn capacity_route_reports_headroom_and_tiers() {
    let fixture = fixture(mason_roster(160));
    seed_demand(&fixture.store);
    let response = router(&fixture)
        .oneshot(get("/api/v1/capacity/egy"))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["headroom"]["effective_headroom"], 100);
    assert_eq!(body["tier_status"]["tiers"][0]["status"], "OPEN");
    assert_eq!(body["tier_status"]["tiers"][1]["capacity"], 10);
}

#[tokio::test]
async fn dominance_route_reports_level() {
    let fixture = fixture(MemoryRoster::with(
        vec![cap("EGY", 1_000)],
        [
            workers("EGY", "MASON", 150, crate::allocation::WorkerState::InCountry),
            workers("IND", "MASON", 150, crate::allocation::WorkerState::InCountry),
        ]
        .concat(),
    ));
    let response = router(&fixture)
        .oneshot(get("/api/v1/dominance/EGY/MASON"))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["level"], "CRITICAL");
    assert_eq!(body["is_blocking"], true);
}

#[tokio::test]
async fn queue_routes_drain_and_report() {
    let fixture = fixture(mason_roster(60));
    seed_demand(&fixture.store);
    for _ in 0..2 {
        fixture
            .service
            .process_request(submission("EGY", "MASON", "EST-MID", 3))
            .expect("queued");
    }
    let app = router(&fixture);

    let status = app
        .clone()
        .oneshot(get("/api/v1/queue/EGY"))
        .await
        .expect("router response");
    let body = read_json_body(status).await;
    assert_eq!(body["total_requests"], 2);
    assert_eq!(body["tiers"][1]["queued_workers"], 6);

    fixture.roster.set_cap("EGY", 160);
    let drained = app
        .oneshot(post_empty("/api/v1/queue/EGY/process/2"))
        .await
        .expect("router response");
    assert_eq!(drained.status(), StatusCode::OK);
    let body = read_json_body(drained).await;
    assert_eq!(body["processed_count"], 2);
    assert_eq!(body["capacity_used"], 6);
    assert_eq!(fixture.store.queue_len("EGY"), 0);
}

#[tokio::test]
async fn drain_route_rejects_unknown_tiers() {
    let fixture = fixture(mason_roster(60));
    let response = router(&fixture)
        .oneshot(post_empty("/api/v1/queue/EGY/process/7"))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn withdraw_and_confirm_routes_act_on_queue_entries() {
    let fixture = fixture(mason_roster(60));
    seed_demand(&fixture.store);
    let queued: Vec<_> = (0..2)
        .map(|_| {
            fixture
                .service
                .process_request(submission("EGY", "MASON", "EST-MID", 3))
                .expect("queued")
                .request
                .id
        })
        .collect();
    let app = router(&fixture);

    let confirmed = app
        .clone()
        .oneshot(post_empty(&format!(
            "/api/v1/queue/requests/{}/confirm",
            queued[0]
        )))
        .await
        .expect("router response");
    assert_eq!(confirmed.status(), StatusCode::OK);
    let body = read_json_body(confirmed).await;
    assert_eq!(body["is_confirmed"], true);
    assert_eq!(body["tier"], TierLevel::Secondary.number());

    let withdrawn = app
        .clone()
        .oneshot(post_empty(&format!(
            "/api/v1/queue/requests/{}/withdraw",
            queued[1]
        )))
        .await
        .expect("router response");
    assert_eq!(withdrawn.status(), StatusCode::OK);
    let body = read_json_body(withdrawn).await;
    assert_eq!(body["status"], "WITHDRAWN");

    let missing = app
        .oneshot(post_empty(&format!(
            "/api/v1/queue/requests/{}/withdraw",
            queued[1]
        )))
        .await
        .expect("router response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submit_handler_returns_unavailable_on_repository_outage() {
    let service = Arc::new(QuotaAllocationService::new(
        Arc::new(UnavailableRepository),
        Arc::new(MemoryStore::default()),
        Arc::new(mason_roster(500)),
        Arc::new(FixedClock::at(now())),
        &QuotaParameters::default(),
    ));

    let response = submit_handler::<UnavailableRepository, MemoryStore, MemoryRoster>(
        State(service),
        axum::Json(submission("EGY", "MASON", "EST-MID", 2)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn repository_failures_map_to_distinct_statuses() {
    let conflict = error_response(ServiceError::Repository(RepositoryError::Conflict(
        "request req-000001 is no longer QUEUED".to_string(),
    )));
    assert_eq!(conflict.status(), StatusCode::CONFLICT);

    let missing = error_response(ServiceError::Repository(RepositoryError::NotFound));
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let outage = error_response(ServiceError::Repository(RepositoryError::Unavailable(
        "ledger lock poisoned".to_string(),
    )));
    assert_eq!(outage.status(), StatusCode::SERVICE_UNAVAILABLE);
}

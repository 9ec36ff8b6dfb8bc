use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use super::capacity::ConfigurationError;
use super::domain::{NationalityCode, ProfessionId, RequestId, RequestSubmission, TierLevel};
use super::queue::QueueError;
use super::repository::{ClassificationStore, QuotaRepository, RepositoryError, WorkforceRoster};
use super::service::{QuotaAllocationService, ServiceError};

type SharedService<R, C, W> = State<Arc<QuotaAllocationService<R, C, W>>>;

/// Router builder exposing decision, capacity, dominance and queue endpoints.
pub fn allocation_router<R, C, W>(service: Arc<QuotaAllocationService<R, C, W>>) -> Router
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(submit_handler::<R, C, W>))
        .route(
            "/api/v1/requests/check-eligibility",
            post(eligibility_handler::<R, C, W>),
        )
        .route("/api/v1/requests/:request_id", get(request_handler::<R, C, W>))
        .route(
            "/api/v1/requests/:request_id/decisions",
            get(decisions_handler::<R, C, W>),
        )
        .route(
            "/api/v1/capacity/:nationality",
            get(capacity_handler::<R, C, W>),
        )
        .route(
            "/api/v1/capacity/:nationality/outflow",
            get(outflow_handler::<R, C, W>),
        )
        .route("/api/v1/tiers/:nationality", get(tiers_handler::<R, C, W>))
        .route(
            "/api/v1/tiers/:nationality/refresh",
            post(refresh_tiers_handler::<R, C, W>),
        )
        .route(
            "/api/v1/dominance/:nationality/:profession",
            get(dominance_handler::<R, C, W>),
        )
        .route("/api/v1/alerts/:nationality", get(alerts_handler::<R, C, W>))
        .route(
            "/api/v1/alerts/:nationality/refresh",
            post(refresh_alerts_handler::<R, C, W>),
        )
        .route("/api/v1/queue/:nationality", get(queue_handler::<R, C, W>))
        .route(
            "/api/v1/queue/:nationality/process/:tier",
            post(drain_handler::<R, C, W>),
        )
        .route(
            "/api/v1/queue/:nationality/revalidate",
            post(revalidate_handler::<R, C, W>),
        )
        .route(
            "/api/v1/queue/requests/:request_id",
            get(queue_entry_handler::<R, C, W>),
        )
        .route(
            "/api/v1/queue/requests/:request_id/withdraw",
            post(withdraw_handler::<R, C, W>),
        )
        .route(
            "/api/v1/queue/requests/:request_id/confirm",
            post(confirm_handler::<R, C, W>),
        )
        .with_state(service)
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) fn error_response(error: ServiceError) -> Response {
    let message = error.to_string();
    let (status, payload) = match &error {
        ServiceError::Validation(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": message }),
        ),
        ServiceError::NotFound(id) | ServiceError::Queue(QueueError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            json!({ "error": message, "request_id": id.0 }),
        ),
        ServiceError::Queue(QueueError::CapacityExceeded {
            nationality,
            tier,
            max,
        }) => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "nationality": nationality.0,
                "tier": tier.number(),
                "max_queue_per_tier": max,
            }),
        ),
        ServiceError::Configuration(ConfigurationError::MissingCap { nationality, year }) => (
            StatusCode::CONFLICT,
            json!({ "error": message, "nationality": nationality.0, "year": year }),
        ),
        ServiceError::Repository(repository)
        | ServiceError::Queue(QueueError::Repository(repository)) => {
            let status = match repository {
                RepositoryError::Conflict(_) => StatusCode::CONFLICT,
                RepositoryError::NotFound => StatusCode::NOT_FOUND,
                RepositoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, json!({ "error": message }))
        }
    };
    (status, Json(payload)).into_response()
}

pub(crate) async fn submit_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Json(submission): Json<RequestSubmission>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::CREATED, service.process_request(submission))
}

pub(crate) async fn eligibility_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Json(submission): Json<RequestSubmission>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.check_eligibility(submission))
}

pub(crate) async fn request_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(request_id): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.get_request(&RequestId(request_id)))
}

pub(crate) async fn decisions_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(request_id): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.decision_history(&RequestId(request_id)))
}

pub(crate) async fn capacity_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.capacity_snapshot(&NationalityCode::new(nationality)),
    )
}

pub(crate) async fn outflow_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.project_outflow(&NationalityCode::new(nationality), None),
    )
}

pub(crate) async fn tiers_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.tiers(&NationalityCode::new(nationality)))
}

pub(crate) async fn refresh_tiers_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.refresh_tiers(&NationalityCode::new(nationality)),
    )
}

pub(crate) async fn dominance_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path((nationality, profession)): Path<(String, String)>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.check_dominance(&NationalityCode::new(nationality), &ProfessionId(profession)),
    )
}

pub(crate) async fn alerts_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.alerts_for_nationality(&NationalityCode::new(nationality)),
    )
}

pub(crate) async fn refresh_alerts_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.refresh_alerts(&NationalityCode::new(nationality)),
    )
}

pub(crate) async fn queue_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.queue_status(&NationalityCode::new(nationality)),
    )
}

pub(crate) async fn drain_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path((nationality, tier)): Path<(String, u8)>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    let Some(tier) = TierLevel::from_number(tier) else {
        let payload = json!({ "error": format!("tier must be between 1 and 4, got {tier}") });
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response();
    };
    respond(
        StatusCode::OK,
        service.process_queue(&NationalityCode::new(nationality), tier),
    )
}

pub(crate) async fn revalidate_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(nationality): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(
        StatusCode::OK,
        service.revalidate_queue(&NationalityCode::new(nationality)),
    )
}

pub(crate) async fn queue_entry_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(request_id): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.queue_entry(&RequestId(request_id)))
}

pub(crate) async fn withdraw_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(request_id): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.withdraw(&RequestId(request_id)))
}

pub(crate) async fn confirm_handler<R, C, W>(
    State(service): SharedService<R, C, W>,
    Path(request_id): Path<String>,
) -> Response
where
    R: QuotaRepository + 'static,
    C: ClassificationStore + 'static,
    W: WorkforceRoster + 'static,
{
    respond(StatusCode::OK, service.confirm(&RequestId(request_id)))
}

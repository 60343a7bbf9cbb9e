use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    Actor, BuyerId, BuyerType, Money, OfferId, PaymentChannel, PaymentId, ReviewerId, Role,
};
use super::error::EngineError;
use super::offers::OfferSubmission;
use super::payments::PaymentRequest;
use super::repository::{PropertyAvailabilitySink, PurchaseRepository, RepositoryError};
use super::service::{PurchaseService, PurchaseServiceError};
use super::verification::{VerificationEvent, VerificationKind};

const DEFAULT_SWEEP_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct RegisterAccountRequest {
    pub buyer_id: BuyerId,
    #[serde(default = "default_roles")]
    pub roles: Vec<Role>,
}

fn default_roles() -> Vec<Role> {
    vec![Role::Buyer]
}

#[derive(Debug, Deserialize)]
pub struct VerificationRequest {
    pub kind: VerificationKind,
}

#[derive(Debug, Deserialize)]
pub struct BuyerTypeRequest {
    pub buyer_type: BuyerType,
}

#[derive(Debug, Deserialize)]
pub struct SubmitOfferRequest {
    pub buyer_id: BuyerId,
    #[serde(flatten)]
    pub submission: OfferSubmission,
}

#[derive(Debug, Deserialize)]
pub struct ApproveOfferRequest {
    pub reviewer_id: ReviewerId,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectOfferRequest {
    pub reviewer_id: ReviewerId,
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BuyerActionRequest {
    pub buyer_id: BuyerId,
}

#[derive(Debug, Deserialize)]
pub struct SubmitPaymentRequest {
    pub buyer_id: BuyerId,
    pub amount: Money,
    pub method: PaymentChannel,
}

#[derive(Debug, Deserialize)]
pub struct ReviewPaymentRequest {
    pub reviewer_id: ReviewerId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Router exposing verification intake, reviewer actions, and dashboard reads.
pub fn purchase_router<R, S>(service: Arc<PurchaseService<R, S>>) -> Router
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    Router::new()
        .route("/api/v1/buyers", post(register_handler::<R, S>))
        .route(
            "/api/v1/buyers/:buyer_id/verifications",
            post(verification_handler::<R, S>),
        )
        .route(
            "/api/v1/buyers/:buyer_id/buyer-type",
            post(buyer_type_handler::<R, S>),
        )
        .route(
            "/api/v1/buyers/:buyer_id/permissions",
            get(permissions_handler::<R, S>),
        )
        .route(
            "/api/v1/buyers/:buyer_id/offers",
            get(active_offers_handler::<R, S>),
        )
        .route(
            "/api/v1/buyers/:buyer_id/portfolio",
            get(portfolio_handler::<R, S>),
        )
        .route("/api/v1/offers", post(submit_offer_handler::<R, S>))
        .route(
            "/api/v1/offers/:offer_id",
            get(offer_status_handler::<R, S>).delete(delete_offer_handler::<R, S>),
        )
        .route(
            "/api/v1/offers/:offer_id/approve",
            post(approve_offer_handler::<R, S>),
        )
        .route(
            "/api/v1/offers/:offer_id/reject",
            post(reject_offer_handler::<R, S>),
        )
        .route(
            "/api/v1/offers/:offer_id/withdraw",
            post(withdraw_offer_handler::<R, S>),
        )
        .route(
            "/api/v1/offers/:offer_id/effects/retry",
            post(retry_effects_handler::<R, S>),
        )
        .route(
            "/api/v1/offers/:offer_id/payments",
            get(list_payments_handler::<R, S>).post(submit_payment_handler::<R, S>),
        )
        .route(
            "/api/v1/payments/:payment_id/verify",
            post(verify_payment_handler::<R, S>),
        )
        .route(
            "/api/v1/payments/:payment_id/reject",
            post(reject_payment_handler::<R, S>),
        )
        .route(
            "/api/v1/payments/:payment_id/cancel",
            post(cancel_payment_handler::<R, S>),
        )
        .route(
            "/api/v1/maintenance/expire-sweep",
            post(sweep_handler::<R, S>),
        )
        .route(
            "/api/v1/maintenance/effects/retry",
            post(retry_all_effects_handler::<R, S>),
        )
        .with_state(service)
}

type ServiceState<R, S> = State<Arc<PurchaseService<R, S>>>;

fn respond<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, PurchaseServiceError>,
) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Maps service failures onto HTTP statuses.
pub(crate) fn error_response(err: PurchaseServiceError) -> Response {
    let status = match &err {
        PurchaseServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        PurchaseServiceError::Repository(RepositoryError::Conflict)
        | PurchaseServiceError::Repository(RepositoryError::Stale) => StatusCode::CONFLICT,
        PurchaseServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        PurchaseServiceError::Engine(engine) => match engine {
            EngineError::ConcurrentModification { .. }
            | EngineError::IllegalTransition { .. }
            | EngineError::OfferNotApproved { .. }
            | EngineError::NotYetExpired(_) => StatusCode::CONFLICT,
            EngineError::Unauthorized { .. }
            | EngineError::PermissionDenied(_)
            | EngineError::PrerequisiteNotMet { .. } => StatusCode::FORBIDDEN,
            EngineError::MissingRejectionReason | EngineError::InvalidAmount { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::SideEffectFailed { .. } => StatusCode::BAD_GATEWAY,
            EngineError::LedgerIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };

    let payload = json!({
        "error": err.to_string(),
    });
    (status, Json(payload)).into_response()
}

pub(crate) async fn register_handler<R, S>(
    State(service): ServiceState<R, S>,
    Json(request): Json<RegisterAccountRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(
        StatusCode::CREATED,
        service.register_account(request.buyer_id, request.roles, Utc::now()),
    )
}

pub(crate) async fn verification_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(buyer_id): Path<String>,
    Json(request): Json<VerificationRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let event = VerificationEvent {
        kind: request.kind,
        buyer_id: BuyerId(buyer_id),
    };
    respond(StatusCode::OK, service.record_verification(event, Utc::now()))
}

pub(crate) async fn buyer_type_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(buyer_id): Path<String>,
    Json(request): Json<BuyerTypeRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(
        StatusCode::OK,
        service.select_buyer_type(&BuyerId(buyer_id), request.buyer_type, Utc::now()),
    )
}

pub(crate) async fn permissions_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(buyer_id): Path<String>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(StatusCode::OK, service.permissions(&BuyerId(buyer_id)))
}

pub(crate) async fn active_offers_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(buyer_id): Path<String>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(
        StatusCode::OK,
        service.active_offers(&BuyerId(buyer_id), Utc::now()),
    )
}

pub(crate) async fn portfolio_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(buyer_id): Path<String>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(StatusCode::OK, service.portfolio(&BuyerId(buyer_id)))
}

pub(crate) async fn submit_offer_handler<R, S>(
    State(service): ServiceState<R, S>,
    Json(request): Json<SubmitOfferRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(
        StatusCode::CREATED,
        service.submit_offer(&request.buyer_id, request.submission, Utc::now()),
    )
}

pub(crate) async fn offer_status_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(
        StatusCode::OK,
        service.offer_status(&OfferId(offer_id), Utc::now()),
    )
}

pub(crate) async fn approve_offer_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
    Json(request): Json<ApproveOfferRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Reviewer(request.reviewer_id);
    respond(
        StatusCode::OK,
        service.approve_offer(&OfferId(offer_id), &actor, request.notes, Utc::now()),
    )
}

pub(crate) async fn reject_offer_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
    Json(request): Json<RejectOfferRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Reviewer(request.reviewer_id);
    respond(
        StatusCode::OK,
        service.reject_offer(
            &OfferId(offer_id),
            &actor,
            request.reason,
            request.notes,
            Utc::now(),
        ),
    )
}

pub(crate) async fn withdraw_offer_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
    Json(request): Json<BuyerActionRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Buyer(request.buyer_id);
    respond(
        StatusCode::OK,
        service.withdraw_offer(&OfferId(offer_id), &actor, Utc::now()),
    )
}

pub(crate) async fn delete_offer_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
    Json(request): Json<BuyerActionRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Buyer(request.buyer_id);
    respond(
        StatusCode::OK,
        service.delete_offer(&OfferId(offer_id), &actor, Utc::now()),
    )
}

pub(crate) async fn retry_effects_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(
        StatusCode::OK,
        service.retry_offer_effects(&OfferId(offer_id)),
    )
}

pub(crate) async fn list_payments_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    respond(StatusCode::OK, service.payments_for_offer(&OfferId(offer_id)))
}

pub(crate) async fn submit_payment_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(offer_id): Path<String>,
    Json(request): Json<SubmitPaymentRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Buyer(request.buyer_id);
    let payment = PaymentRequest {
        amount: request.amount,
        method: request.method,
    };
    respond(
        StatusCode::CREATED,
        service.submit_payment(&OfferId(offer_id), &actor, payment, Utc::now()),
    )
}

pub(crate) async fn verify_payment_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(payment_id): Path<String>,
    Json(request): Json<ReviewPaymentRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Reviewer(request.reviewer_id);
    respond(
        StatusCode::OK,
        service.verify_payment(&PaymentId(payment_id), &actor, Utc::now()),
    )
}

pub(crate) async fn reject_payment_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(payment_id): Path<String>,
    Json(request): Json<ReviewPaymentRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Reviewer(request.reviewer_id);
    let reason = request.reason.unwrap_or_default();
    respond(
        StatusCode::OK,
        service.reject_payment(&PaymentId(payment_id), &actor, &reason, Utc::now()),
    )
}

pub(crate) async fn cancel_payment_handler<R, S>(
    State(service): ServiceState<R, S>,
    Path(payment_id): Path<String>,
    Json(request): Json<BuyerActionRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let actor = Actor::Buyer(request.buyer_id);
    respond(
        StatusCode::OK,
        service.cancel_payment(&PaymentId(payment_id), &actor, Utc::now()),
    )
}

pub(crate) async fn sweep_handler<R, S>(
    State(service): ServiceState<R, S>,
    Json(request): Json<MaintenanceRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let limit = request.limit.unwrap_or(DEFAULT_SWEEP_LIMIT);
    match service.sweep_expired(Utc::now(), limit) {
        Ok(expired) => (StatusCode::OK, Json(json!({ "expired": expired }))).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn retry_all_effects_handler<R, S>(
    State(service): ServiceState<R, S>,
    Json(request): Json<MaintenanceRequest>,
) -> Response
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let limit = request.limit.unwrap_or(DEFAULT_SWEEP_LIMIT);
    respond(StatusCode::OK, service.retry_all_effects(limit))
}

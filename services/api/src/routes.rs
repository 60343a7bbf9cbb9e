use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use homebuy::workflows::purchase::{
    purchase_router, PropertyAvailabilitySink, PurchaseRepository, PurchaseService,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_purchase_routes<R, S>(service: Arc<PurchaseService<R, S>>) -> axum::Router
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    let currency = service.config().currency.clone();
    purchase_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/marketplace",
            axum::routing::get(move || {
                let currency = currency.clone();
                async move { Json(json!({ "currency": currency })) }
            }),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryAvailabilitySink, InMemoryPurchaseRepository};
use crate::routes::with_purchase_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use homebuy::config::AppConfig;
use homebuy::error::AppError;
use homebuy::telemetry;
use homebuy::workflows::purchase::{
    PropertyAvailabilitySink, PurchaseRepository, PurchaseService,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const MAINTENANCE_BATCH: usize = 200;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let purchase_service = Arc::new(PurchaseService::new(
        Arc::new(InMemoryPurchaseRepository::default()),
        Arc::new(InMemoryAvailabilitySink::default()),
        config.marketplace.clone(),
    ));

    if args.maintenance_interval > 0 {
        spawn_maintenance(
            purchase_service.clone(),
            Duration::from_secs(args.maintenance_interval),
        );
    }

    let app = with_purchase_routes(purchase_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        currency = %config.marketplace.currency,
        offer_validity_days = config.marketplace.offer_validity_days,
        "purchase lifecycle service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically expires lapsed offers and redelivers outstanding availability changes.
fn spawn_maintenance<R, S>(service: Arc<PurchaseService<R, S>>, every: Duration)
where
    R: PurchaseRepository + 'static,
    S: PropertyAvailabilitySink + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(err) = service.sweep_expired(Utc::now(), MAINTENANCE_BATCH) {
                error!(error = %err, "expiry sweep failed");
            }
            match service.retry_all_effects(MAINTENANCE_BATCH) {
                Ok(report) if !report.failed.is_empty() => {
                    error!(
                        failed = report.failed.len(),
                        delivered = report.delivered.len(),
                        "availability notifications still undelivered"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "outbox retry failed"),
            }
        }
    });
}

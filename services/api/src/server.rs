use crate::cli::ServeArgs;
use crate::infra::{AppState, QuotaService, SeedRoster};
use crate::routes::with_quota_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use nationality_quota::allocation::{NationalityCode, SystemClock};
use nationality_quota::config::AppConfig;
use nationality_quota::error::AppError;
use nationality_quota::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let seed = SeedRoster::load(args.seed.as_deref(), Utc::now())?;
    let seeded = seed.into_service(&config.parameters, Arc::new(SystemClock))?;
    warm_up(&seeded.service, &seeded.restricted)?;

    let app = with_quota_routes(seeded.service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        parameter_version = %config.parameters.parameter_version,
        "nationality quota service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Classify tiers and raise dominance alerts before the first request arrives.
fn warm_up(service: &QuotaService, nationalities: &[NationalityCode]) -> Result<(), AppError> {
    for nationality in nationalities {
        service.refresh_tiers(nationality)?;
        service.refresh_alerts(nationality)?;
    }
    Ok(())
}

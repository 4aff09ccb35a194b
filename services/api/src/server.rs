use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_academic_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use school_erp::academics::{AcademicYearService, SqliteSchoolStore};
use school_erp::config::AppConfig;
use school_erp::error::AppError;
use school_erp::telemetry;
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

    let store = Arc::new(SqliteSchoolStore::open(&config.database)?);
    let academic_service = Arc::new(AcademicYearService::new(store, config.calendar));

    let app = with_academic_routes(academic_service, config.environment)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        database = ?config.database,
        "school administration backend ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use school_erp::academics::{
    academic_year_router, AcademicYearService, AcademicYearStore, RosterStore,
};
use school_erp::config::AppEnvironment;
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_academic_routes<S>(
    service: Arc<AcademicYearService<S>>,
    environment: AppEnvironment,
) -> axum::Router
where
    S: AcademicYearStore + RosterStore + 'static,
{
    academic_year_router(service, environment)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use school_erp::academics::{SqliteSchoolStore, ROLE_HEADER};
    use school_erp::config::CalendarConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn app(ready: bool) -> (axum::Router, Arc<AtomicBool>) {
        let store = SqliteSchoolStore::open_in_memory().expect("in-memory store");
        let service = Arc::new(AcademicYearService::new(
            Arc::new(store),
            CalendarConfig::default(),
        ));
        let readiness = Arc::new(AtomicBool::new(ready));
        let state = AppState {
            readiness: readiness.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router =
            with_academic_routes(service, AppEnvironment::Test).layer(Extension(state));
        (router, readiness)
    }

    async fn status_of(router: axum::Router, uri: &str, role: Option<&str>) -> StatusCode {
        let mut request = Request::get(uri);
        if let Some(role) = role {
            request = request.header(ROLE_HEADER, role);
        }
        router
            .oneshot(request.body(Body::empty()).expect("request builds"))
            .await
            .expect("route executes")
            .status()
    }

    #[tokio::test]
    async fn readiness_flips_once_the_flag_is_set() {
        let (router, readiness) = app(false);
        assert_eq!(
            status_of(router.clone(), "/ready", None).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        readiness.store(true, Ordering::Release);
        assert_eq!(status_of(router, "/ready", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn operational_routes_skip_the_role_gate() {
        let (router, _) = app(true);
        assert_eq!(status_of(router.clone(), "/health", None).await, StatusCode::OK);
        assert_eq!(status_of(router.clone(), "/metrics", None).await, StatusCode::OK);
        assert_eq!(
            status_of(router.clone(), "/api/academicyears", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(router, "/api/academicyears", Some("staff")).await,
            StatusCode::OK
        );
    }
}

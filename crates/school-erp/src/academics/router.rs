use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::access::{require_role, AccessError, Role, ADMIN_ONLY, ANY_ROLE, GRADING};
use super::domain::{
    AcademicYear, AcademicYearId, AcademicYearStatus, ExamScore, Grade, GradeId, SchoolSection,
    Student, StudentId, StudentStatus,
};
use super::lifecycle::{LifecycleStep, LifecycleSummary};
use super::repository::{AcademicYearStore, RepositoryError, RosterStore};
use super::service::{AcademicYearService, AcademicYearServiceError, ErrorKind};
use super::validation::{
    AcademicYearRequest, ExamScoreRequest, NewGradeRequest, NewStudentRequest,
};
use crate::config::AppEnvironment;

const GENERIC_STORAGE_ERROR: &str = "the request could not be completed; see server logs";

/// Shared handler state: the service plus how much error detail callers may see.
pub struct AcademicsState<S> {
    service: Arc<AcademicYearService<S>>,
    environment: AppEnvironment,
}

impl<S> Clone for AcademicsState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            environment: self.environment,
        }
    }
}

/// Router exposing the academic year registry, its lifecycle and the roster endpoints.
pub fn academic_year_router<S>(
    service: Arc<AcademicYearService<S>>,
    environment: AppEnvironment,
) -> Router
where
    S: AcademicYearStore + RosterStore + 'static,
{
    let state = AcademicsState {
        service,
        environment,
    };

    Router::new()
        .route(
            "/api/academicyears",
            get(list_years::<S>).post(create_year::<S>),
        )
        .route("/api/academicyears/active", get(active_year::<S>))
        .route(
            "/api/academicyears/:id",
            get(get_year::<S>)
                .put(update_year::<S>)
                .delete(delete_year::<S>),
        )
        .route("/api/academicyears/:id/close", post(close_year::<S>))
        .route("/api/academicyears/:id/promote-all", post(promote_all::<S>))
        .route(
            "/api/academicyears/:id/archive-graduates",
            post(archive_graduates::<S>),
        )
        .route("/api/academicyears/:id/activate", post(activate_year::<S>))
        .route("/api/academicyears/:id/rollover", post(rollover_year::<S>))
        .route("/api/exams/scores", post(record_score::<S>))
        .route("/api/grades", get(list_grades::<S>).post(create_grade::<S>))
        .route("/api/students", post(enroll_student::<S>))
        .route("/api/students/:id", get(get_student::<S>))
        .route("/api/students/:id/scores", get(student_scores::<S>))
        .with_state(state)
}

/// Wire shape of an academic year; timestamps always leave in UTC.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYearView {
    pub id: AcademicYearId,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
    pub status: AcademicYearStatus,
}

impl From<&AcademicYear> for AcademicYearView {
    fn from(year: &AcademicYear) -> Self {
        Self {
            id: year.id,
            name: year.name.clone(),
            start_date: utc_timestamp(&year.start_date),
            end_date: utc_timestamp(&year.end_date),
            is_active: year.is_active,
            status: year.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleView {
    pub academic_year_id: AcademicYearId,
    pub status: AcademicYearStatus,
    pub steps: Vec<LifecycleStep>,
    pub promoted: usize,
    pub graduated: usize,
}

impl From<LifecycleSummary> for LifecycleView {
    fn from(summary: LifecycleSummary) -> Self {
        Self {
            academic_year_id: summary.academic_year_id,
            status: summary.status,
            steps: summary.steps,
            promoted: summary.promoted,
            graduated: summary.graduated,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeView {
    pub id: GradeId,
    pub name: String,
    pub full_name: String,
    pub stream: String,
    pub level: u8,
    pub section: SchoolSection,
    pub homeroom_teacher_id: Option<i64>,
    pub is_active: bool,
}

impl From<&Grade> for GradeView {
    fn from(grade: &Grade) -> Self {
        Self {
            id: grade.id,
            name: grade.name.clone(),
            full_name: grade.full_name(),
            stream: grade.stream.clone(),
            level: grade.level,
            section: grade.section,
            homeroom_teacher_id: grade.homeroom_teacher_id,
            is_active: grade.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub grade_id: GradeId,
    pub status: StudentStatus,
    pub graduated_in: Option<AcademicYearId>,
}

impl From<&Student> for StudentView {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            display_name: student.display_name(),
            grade_id: student.grade_id,
            status: student.status,
            graduated_in: student.graduated_in,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamScoreView {
    pub student_id: StudentId,
    pub academic_year_id: AcademicYearId,
    pub subject: String,
    pub term: u8,
    pub score: Option<f32>,
    pub is_absent: bool,
    pub recorded_at: String,
}

impl From<&ExamScore> for ExamScoreView {
    fn from(score: &ExamScore) -> Self {
        Self {
            student_id: score.student_id,
            academic_year_id: score.academic_year_id,
            subject: score.subject.clone(),
            term: score.term,
            score: score.score,
            is_absent: score.is_absent,
            recorded_at: utc_timestamp(&score.recorded_at),
        }
    }
}

fn utc_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn list_years<S>(State(state): State<AcademicsState<S>>, headers: HeaderMap) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ANY_ROLE, StatusCode::OK, |service| {
        service
            .list()
            .map(|years| years.iter().map(AcademicYearView::from).collect::<Vec<_>>())
    })
    .await
}

async fn active_year<S>(State(state): State<AcademicsState<S>>, headers: HeaderMap) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ANY_ROLE, StatusCode::OK, |service| {
        service.get_active().map(|year| AcademicYearView::from(&year))
    })
    .await
}

async fn get_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ANY_ROLE, StatusCode::OK, move |service| {
        service
            .get(AcademicYearId(id))
            .map(|year| AcademicYearView::from(&year))
    })
    .await
}

async fn create_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    body: Result<Json<AcademicYearRequest>, JsonRejection>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    with_body(&state, &headers, ADMIN_ONLY, StatusCode::CREATED, body, |service, request| {
        service
            .create(&request)
            .map(|year| AcademicYearView::from(&year))
    })
    .await
}

async fn update_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Result<Json<AcademicYearRequest>, JsonRejection>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    with_body(&state, &headers, ADMIN_ONLY, StatusCode::OK, body, move |service, request| {
        service
            .update(AcademicYearId(id), &request)
            .map(|year| AcademicYearView::from(&year))
    })
    .await
}

async fn delete_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    if let Err(err) = require_role(&headers, ADMIN_ONLY) {
        return access_denied(err);
    }
    match blocking(&state, move |service| service.delete(AcademicYearId(id))).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => service_error(&state, err),
    }
}

async fn activate_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ADMIN_ONLY, StatusCode::OK, move |service| {
        service
            .activate(AcademicYearId(id))
            .map(|year| AcademicYearView::from(&year))
    })
    .await
}

async fn close_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ADMIN_ONLY, StatusCode::OK, move |service| {
        service.close(AcademicYearId(id)).map(LifecycleView::from)
    })
    .await
}

async fn promote_all<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ADMIN_ONLY, StatusCode::OK, move |service| {
        service
            .promote_all(AcademicYearId(id))
            .map(LifecycleView::from)
    })
    .await
}

async fn archive_graduates<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ADMIN_ONLY, StatusCode::OK, move |service| {
        service
            .archive_graduates(AcademicYearId(id))
            .map(LifecycleView::from)
    })
    .await
}

async fn rollover_year<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ADMIN_ONLY, StatusCode::OK, move |service| {
        service.rollover(AcademicYearId(id)).map(LifecycleView::from)
    })
    .await
}

async fn record_score<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    body: Result<Json<ExamScoreRequest>, JsonRejection>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    with_body(&state, &headers, GRADING, StatusCode::CREATED, body, |service, request| {
        service
            .record_score(&request)
            .map(|score| ExamScoreView::from(&score))
    })
    .await
}

async fn list_grades<S>(State(state): State<AcademicsState<S>>, headers: HeaderMap) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ANY_ROLE, StatusCode::OK, |service| {
        service
            .grades()
            .map(|grades| grades.iter().map(GradeView::from).collect::<Vec<_>>())
    })
    .await
}

async fn create_grade<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    body: Result<Json<NewGradeRequest>, JsonRejection>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    with_body(&state, &headers, ADMIN_ONLY, StatusCode::CREATED, body, |service, request| {
        service
            .create_grade(&request)
            .map(|grade| GradeView::from(&grade))
    })
    .await
}

async fn enroll_student<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    body: Result<Json<NewStudentRequest>, JsonRejection>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    with_body(&state, &headers, ADMIN_ONLY, StatusCode::CREATED, body, |service, request| {
        service
            .enroll(&request)
            .map(|student| StudentView::from(&student))
    })
    .await
}

async fn get_student<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ANY_ROLE, StatusCode::OK, move |service| {
        service
            .student(StudentId(id))
            .map(|student| StudentView::from(&student))
    })
    .await
}

async fn student_scores<S>(
    State(state): State<AcademicsState<S>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
{
    respond(&state, &headers, ANY_ROLE, StatusCode::OK, move |service| {
        service
            .scores_for_student(StudentId(id))
            .map(|scores| scores.iter().map(ExamScoreView::from).collect::<Vec<_>>())
    })
    .await
}

/// Runs a service call on the blocking pool; SQLite waits on its write lock synchronously.
async fn blocking<S, T, F>(
    state: &AcademicsState<S>,
    op: F,
) -> Result<T, AcademicYearServiceError>
where
    S: AcademicYearStore + RosterStore + 'static,
    T: Send + 'static,
    F: FnOnce(&AcademicYearService<S>) -> Result<T, AcademicYearServiceError> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || op(&service))
        .await
        .map_err(|err| RepositoryError::Unavailable(format!("spawn_blocking failed: {err}")))?
}

async fn respond<S, T, F>(
    state: &AcademicsState<S>,
    headers: &HeaderMap,
    allowed: &[Role],
    success: StatusCode,
    op: F,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
    T: Serialize + Send + 'static,
    F: FnOnce(&AcademicYearService<S>) -> Result<T, AcademicYearServiceError> + Send + 'static,
{
    if let Err(err) = require_role(headers, allowed) {
        return access_denied(err);
    }
    respond_with(state, success, blocking(state, op).await)
}

async fn with_body<S, B, T, F>(
    state: &AcademicsState<S>,
    headers: &HeaderMap,
    allowed: &[Role],
    success: StatusCode,
    body: Result<Json<B>, JsonRejection>,
    op: F,
) -> Response
where
    S: AcademicYearStore + RosterStore + 'static,
    B: Send + 'static,
    T: Serialize + Send + 'static,
    F: FnOnce(&AcademicYearService<S>, B) -> Result<T, AcademicYearServiceError> + Send + 'static,
{
    if let Err(err) = require_role(headers, allowed) {
        return access_denied(err);
    }
    match body {
        Ok(Json(request)) => {
            let result = blocking(state, move |service| op(service, request)).await;
            respond_with(state, success, result)
        }
        Err(rejection) => {
            let payload = json!({
                "error": rejection.body_text(),
            });
            (StatusCode::BAD_REQUEST, Json(payload)).into_response()
        }
    }
}

fn respond_with<S, T>(
    state: &AcademicsState<S>,
    success: StatusCode,
    result: Result<T, AcademicYearServiceError>,
) -> Response
where
    T: Serialize,
{
    match result {
        Ok(value) => (success, Json(value)).into_response(),
        Err(err) => service_error(state, err),
    }
}

fn service_error<S>(state: &AcademicsState<S>, err: AcademicYearServiceError) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = ?err, "academic year request failed");
        if state.environment.exposes_internal_errors() {
            err.to_string()
        } else {
            GENERIC_STORAGE_ERROR.to_string()
        }
    } else {
        err.to_string()
    };

    let payload = json!({
        "error": message,
    });
    (status, Json(payload)).into_response()
}

fn access_denied(err: AccessError) -> Response {
    let status = match err {
        AccessError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AccessError::Forbidden(_) => StatusCode::FORBIDDEN,
    };
    let payload = json!({
        "error": err.to_string(),
    });
    (status, Json(payload)).into_response()
}

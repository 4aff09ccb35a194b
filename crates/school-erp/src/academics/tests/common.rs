use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use serde_json::Value;

use crate::academics::domain::{
    AcademicYear, AcademicYearId, ExamScore, Grade, GradeId, SchoolSection, Student, StudentId,
};
use crate::academics::lifecycle::{LifecycleCommand, LifecycleSummary};
use crate::academics::repository::{AcademicYearStore, RepoResult, RepositoryError, RosterStore};
use crate::academics::validation::{
    AcademicYearDraft, AcademicYearRequest, ExamScoreRequest, NewGrade, NewGradeRequest,
    NewStudent, NewStudentRequest, ScoreEntry,
};
use crate::academics::{academic_year_router, AcademicYearService, SqliteSchoolStore, ROLE_HEADER};
use crate::config::{AppEnvironment, CalendarConfig};
use crate::db::open_db_in_memory;

pub(super) type SqliteService = AcademicYearService<SqliteSchoolStore>;

pub(super) fn build_service() -> (SqliteService, Arc<SqliteSchoolStore>) {
    let conn = open_db_in_memory().expect("in-memory database");
    let store = Arc::new(SqliteSchoolStore::new(conn));
    let service = AcademicYearService::new(store.clone(), CalendarConfig::default());
    (service, store)
}

pub(super) fn router_with_service<S>(
    service: AcademicYearService<S>,
    environment: AppEnvironment,
) -> axum::Router
where
    S: AcademicYearStore + RosterStore + 'static,
{
    academic_year_router(Arc::new(service), environment)
}

pub(super) fn year_request(name: &str) -> AcademicYearRequest {
    AcademicYearRequest::new(name, "2024-09-01", "2025-06-30")
}

pub(super) fn create_year(service: &SqliteService, name: &str) -> AcademicYear {
    service.create(&year_request(name)).expect("year created")
}

/// Neo section: Form 1 Blue, Form 2 Blue, Form 2 Grey (Form 2 is terminal).
/// Legacy section: Grade 11 and Grade 12 (Grade 12 is terminal).
pub(super) struct Roster {
    pub(super) form_1_blue: GradeId,
    pub(super) form_2_blue: GradeId,
    pub(super) form_2_grey: GradeId,
    pub(super) grade_11: GradeId,
    pub(super) grade_12: GradeId,
    pub(super) anna: StudentId,
    pub(super) chanda: StudentId,
    pub(super) mutinta: StudentId,
    pub(super) bwalya: StudentId,
}

pub(super) fn seed_roster(service: &SqliteService) -> Roster {
    let grade = |name: &str, stream: &str, level: u8, section: SchoolSection| {
        service
            .create_grade(&NewGradeRequest {
                name: Some(name.to_string()),
                stream: Some(stream.to_string()),
                level,
                section,
                homeroom_teacher_id: None,
            })
            .expect("grade created")
            .id
    };
    let form_2_grey = grade("Form 2", "Grey", 2, SchoolSection::NeoSecondary);
    let form_1_blue = grade("Form 1", "Blue", 1, SchoolSection::NeoSecondary);
    let form_2_blue = grade("Form 2", "Blue", 2, SchoolSection::NeoSecondary);
    let grade_11 = grade("Grade 11", "", 11, SchoolSection::LegacySecondary);
    let grade_12 = grade("Grade 12", "", 12, SchoolSection::LegacySecondary);

    let student = |first: &str, last: &str, grade_id: GradeId| {
        service
            .enroll(&NewStudentRequest {
                first_name: Some(first.to_string()),
                last_name: Some(last.to_string()),
                grade_id: grade_id.0,
            })
            .expect("student enrolled")
            .id
    };

    Roster {
        form_1_blue,
        form_2_blue,
        form_2_grey,
        grade_11,
        grade_12,
        anna: student("Anna", "Banda", form_1_blue),
        chanda: student("Chanda", "Mwale", form_2_blue),
        mutinta: student("Mutinta", "Zulu", grade_11),
        bwalya: student("Bwalya", "Phiri", grade_12),
    }
}

pub(super) fn score_request(
    student: StudentId,
    year: AcademicYearId,
    score: Option<f32>,
) -> ExamScoreRequest {
    ExamScoreRequest {
        student_id: student.0,
        academic_year_id: year.0,
        subject: Some("Mathematics".to_string()),
        term: 1,
        score,
        is_absent: score.is_none(),
    }
}

pub(super) fn json_request(
    method: Method,
    uri: &str,
    role: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder.header(ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("json body")))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Store whose every call fails, either with an error or by panicking.
pub(super) enum BrokenStore {
    Offline,
    Panicking,
}

impl BrokenStore {
    fn fail<T>(&self) -> RepoResult<T> {
        match self {
            BrokenStore::Offline => {
                Err(RepositoryError::Unavailable("database offline".to_string()))
            }
            BrokenStore::Panicking => panic!("store crashed mid-call"),
        }
    }
}

impl AcademicYearStore for BrokenStore {
    fn insert_year(&self, _draft: &AcademicYearDraft) -> RepoResult<AcademicYear> {
        self.fail()
    }

    fn update_year(
        &self,
        _id: AcademicYearId,
        _draft: &AcademicYearDraft,
    ) -> RepoResult<AcademicYear> {
        self.fail()
    }

    fn fetch_year(&self, _id: AcademicYearId) -> RepoResult<Option<AcademicYear>> {
        self.fail()
    }

    fn list_years(&self) -> RepoResult<Vec<AcademicYear>> {
        self.fail()
    }

    fn fetch_active_year(&self) -> RepoResult<Option<AcademicYear>> {
        self.fail()
    }

    fn delete_year(&self, _id: AcademicYearId) -> RepoResult<()> {
        self.fail()
    }

    fn activate_year(&self, _id: AcademicYearId) -> RepoResult<AcademicYear> {
        self.fail()
    }

    fn run_lifecycle(
        &self,
        _id: AcademicYearId,
        _command: LifecycleCommand,
    ) -> RepoResult<LifecycleSummary> {
        self.fail()
    }
}

impl RosterStore for BrokenStore {
    fn insert_grade(&self, _grade: &NewGrade) -> RepoResult<Grade> {
        self.fail()
    }

    fn list_grades(&self) -> RepoResult<Vec<Grade>> {
        self.fail()
    }

    fn insert_student(&self, _student: &NewStudent) -> RepoResult<Student> {
        self.fail()
    }

    fn fetch_student(&self, _id: StudentId) -> RepoResult<Option<Student>> {
        self.fail()
    }

    fn list_students(&self, _include_archived: bool) -> RepoResult<Vec<Student>> {
        self.fail()
    }

    fn record_score(&self, _entry: &ScoreEntry) -> RepoResult<ExamScore> {
        self.fail()
    }

    fn scores_for_student(&self, _id: StudentId) -> RepoResult<Vec<ExamScore>> {
        self.fail()
    }

    fn record_report_card(
        &self,
        _student_id: StudentId,
        _academic_year_id: AcademicYearId,
        _term: u8,
    ) -> RepoResult<()> {
        self.fail()
    }
}

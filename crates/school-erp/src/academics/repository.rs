use super::domain::{
    AcademicYear, AcademicYearId, ExamScore, Grade, Student, StudentId,
};
use super::lifecycle::{LifecycleCommand, LifecycleSummary, PlanError, TransitionError};
use super::validation::{AcademicYearDraft, NewGrade, NewStudent, ScoreEntry};
use crate::db::DbError;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Storage for the academic year registry and its lifecycle batches.
///
/// Every method is one transaction: callers never observe a half-applied command.
pub trait AcademicYearStore: Send + Sync {
    fn insert_year(&self, draft: &AcademicYearDraft) -> RepoResult<AcademicYear>;
    fn update_year(&self, id: AcademicYearId, draft: &AcademicYearDraft)
        -> RepoResult<AcademicYear>;
    fn fetch_year(&self, id: AcademicYearId) -> RepoResult<Option<AcademicYear>>;
    fn list_years(&self) -> RepoResult<Vec<AcademicYear>>;
    fn fetch_active_year(&self) -> RepoResult<Option<AcademicYear>>;
    /// Refuses with [`RepositoryError::Referenced`] while scores, report cards or
    /// graduates still point at the year.
    fn delete_year(&self, id: AcademicYearId) -> RepoResult<()>;
    /// Deactivates the current active year and activates `id` as one step.
    fn activate_year(&self, id: AcademicYearId) -> RepoResult<AcademicYear>;
    /// Runs the command's steps, roster writes included, under one transaction.
    fn run_lifecycle(
        &self,
        id: AcademicYearId,
        command: LifecycleCommand,
    ) -> RepoResult<LifecycleSummary>;
}

/// Collaborator records the lifecycle reads and writes: grades, students, scores.
pub trait RosterStore: Send + Sync {
    fn insert_grade(&self, grade: &NewGrade) -> RepoResult<Grade>;
    fn list_grades(&self) -> RepoResult<Vec<Grade>>;
    fn insert_student(&self, student: &NewStudent) -> RepoResult<Student>;
    fn fetch_student(&self, id: StudentId) -> RepoResult<Option<Student>>;
    fn list_students(&self, include_archived: bool) -> RepoResult<Vec<Student>>;
    /// Upserts the score for `(student, year, subject, term)`; only open years accept it.
    fn record_score(&self, entry: &ScoreEntry) -> RepoResult<ExamScore>;
    fn scores_for_student(&self, id: StudentId) -> RepoResult<Vec<ExamScore>>;
    fn record_report_card(
        &self,
        student_id: StudentId,
        academic_year_id: AcademicYearId,
        term: u8,
    ) -> RepoResult<()>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(
        "academic year {id} is still referenced by {scores} exam scores, {report_cards} report cards and {graduates} graduates"
    )]
    Referenced {
        id: AcademicYearId,
        scores: u64,
        report_cards: u64,
        graduates: u64,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Storage(#[from] DbError),
}

impl RepositoryError {
    pub fn year_not_found(id: AcademicYearId) -> Self {
        Self::NotFound {
            entity: "academic year",
            id: id.0,
        }
    }

    pub fn student_not_found(id: StudentId) -> Self {
        Self::NotFound {
            entity: "student",
            id: id.0,
        }
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

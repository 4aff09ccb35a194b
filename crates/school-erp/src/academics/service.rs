use std::sync::Arc;

use tracing::{error, info, warn};

use super::domain::{AcademicYear, AcademicYearId, ExamScore, Grade, Student, StudentId};
use super::lifecycle::{LifecycleCommand, LifecycleStep, LifecycleSummary};
use super::repository::{AcademicYearStore, RepositoryError, RosterStore};
use super::validation::{
    AcademicYearRequest, ExamScoreRequest, NewGradeRequest, NewStudentRequest, ValidationError,
};
use crate::config::CalendarConfig;

/// Service composing request validation, the registry store and the lifecycle batches.
pub struct AcademicYearService<S> {
    store: Arc<S>,
    calendar: CalendarConfig,
}

impl<S> AcademicYearService<S>
where
    S: AcademicYearStore + RosterStore + 'static,
{
    pub fn new(store: Arc<S>, calendar: CalendarConfig) -> Self {
        Self { store, calendar }
    }

    /// Validate and persist a new, inactive, open year.
    pub fn create(
        &self,
        request: &AcademicYearRequest,
    ) -> Result<AcademicYear, AcademicYearServiceError> {
        let draft = request.validate(&self.calendar)?;
        let year = self.store.insert_year(&draft).map_err(logged)?;
        info!(
            academic_year_id = year.id.0,
            name = %year.name,
            "academic year created"
        );
        Ok(year)
    }

    pub fn get(&self, id: AcademicYearId) -> Result<AcademicYear, AcademicYearServiceError> {
        let year = self
            .store
            .fetch_year(id)
            .map_err(logged)?
            .ok_or(RepositoryError::year_not_found(id))?;
        Ok(year)
    }

    pub fn list(&self) -> Result<Vec<AcademicYear>, AcademicYearServiceError> {
        Ok(self.store.list_years().map_err(logged)?)
    }

    pub fn get_active(&self) -> Result<AcademicYear, AcademicYearServiceError> {
        let year = self
            .store
            .fetch_active_year()
            .map_err(logged)?
            .ok_or(AcademicYearServiceError::NoActiveYear)?;
        Ok(year)
    }

    pub fn update(
        &self,
        id: AcademicYearId,
        request: &AcademicYearRequest,
    ) -> Result<AcademicYear, AcademicYearServiceError> {
        let draft = request.validate(&self.calendar)?;
        let year = self.store.update_year(id, &draft).map_err(logged)?;
        info!(academic_year_id = id.0, "academic year updated");
        Ok(year)
    }

    pub fn delete(&self, id: AcademicYearId) -> Result<(), AcademicYearServiceError> {
        self.store.delete_year(id).map_err(logged)?;
        info!(academic_year_id = id.0, "academic year deleted");
        Ok(())
    }

    /// Make `id` the single active year.
    pub fn activate(&self, id: AcademicYearId) -> Result<AcademicYear, AcademicYearServiceError> {
        let year = self.store.activate_year(id).map_err(logged)?;
        info!(academic_year_id = id.0, "academic year activated");
        Ok(year)
    }

    pub fn close(&self, id: AcademicYearId) -> Result<LifecycleSummary, AcademicYearServiceError> {
        self.run(id, LifecycleCommand::Step(LifecycleStep::Close))
    }

    pub fn promote_all(
        &self,
        id: AcademicYearId,
    ) -> Result<LifecycleSummary, AcademicYearServiceError> {
        self.run(id, LifecycleCommand::Step(LifecycleStep::PromoteAll))
    }

    pub fn archive_graduates(
        &self,
        id: AcademicYearId,
    ) -> Result<LifecycleSummary, AcademicYearServiceError> {
        self.run(id, LifecycleCommand::Step(LifecycleStep::ArchiveGraduates))
    }

    /// Close, archive and promote in one transaction, resuming from partial progress.
    pub fn rollover(
        &self,
        id: AcademicYearId,
    ) -> Result<LifecycleSummary, AcademicYearServiceError> {
        self.run(id, LifecycleCommand::Rollover)
    }

    fn run(
        &self,
        id: AcademicYearId,
        command: LifecycleCommand,
    ) -> Result<LifecycleSummary, AcademicYearServiceError> {
        let summary = self.store.run_lifecycle(id, command).map_err(logged)?;
        info!(
            academic_year_id = id.0,
            status = summary.status.label(),
            promoted = summary.promoted,
            graduated = summary.graduated,
            steps = summary.steps.len(),
            "academic year lifecycle applied"
        );
        Ok(summary)
    }

    pub fn record_score(
        &self,
        request: &ExamScoreRequest,
    ) -> Result<ExamScore, AcademicYearServiceError> {
        let entry = request.validate()?;
        Ok(self.store.record_score(&entry).map_err(logged)?)
    }

    pub fn scores_for_student(
        &self,
        id: StudentId,
    ) -> Result<Vec<ExamScore>, AcademicYearServiceError> {
        // Archived students keep their history.
        self.student(id)?;
        Ok(self.store.scores_for_student(id).map_err(logged)?)
    }

    pub fn create_grade(
        &self,
        request: &NewGradeRequest,
    ) -> Result<Grade, AcademicYearServiceError> {
        let grade = request.validate()?;
        Ok(self.store.insert_grade(&grade).map_err(logged)?)
    }

    pub fn grades(&self) -> Result<Vec<Grade>, AcademicYearServiceError> {
        Ok(self.store.list_grades().map_err(logged)?)
    }

    pub fn enroll(&self, request: &NewStudentRequest) -> Result<Student, AcademicYearServiceError> {
        let student = request.validate()?;
        Ok(self.store.insert_student(&student).map_err(logged)?)
    }

    pub fn students(
        &self,
        include_archived: bool,
    ) -> Result<Vec<Student>, AcademicYearServiceError> {
        Ok(self.store.list_students(include_archived).map_err(logged)?)
    }

    pub fn student(&self, id: StudentId) -> Result<Student, AcademicYearServiceError> {
        let student = self
            .store
            .fetch_student(id)
            .map_err(logged)?
            .ok_or(RepositoryError::student_not_found(id))?;
        Ok(student)
    }
}

fn logged(err: RepositoryError) -> RepositoryError {
    match &err {
        RepositoryError::NotFound { .. }
        | RepositoryError::Conflict(_)
        | RepositoryError::Transition(_)
        | RepositoryError::Referenced { .. } => {
            warn!(error = %err, "academic year request rejected");
        }
        _ => error!(error = ?err, "academic year storage failure"),
    }
    err
}

/// Error raised by the academic year service.
#[derive(Debug, thiserror::Error)]
pub enum AcademicYearServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no academic year is active")]
    NoActiveYear,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// How a service error surfaces to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Storage,
}

impl AcademicYearServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcademicYearServiceError::Validation(_) => ErrorKind::Validation,
            AcademicYearServiceError::NoActiveYear => ErrorKind::NotFound,
            AcademicYearServiceError::Repository(err) => match err {
                RepositoryError::NotFound { .. } => ErrorKind::NotFound,
                RepositoryError::Conflict(_) | RepositoryError::Transition(_) => {
                    ErrorKind::Conflict
                }
                // Referenced deletes answer 400.
                RepositoryError::Referenced { .. } => ErrorKind::Validation,
                RepositoryError::Plan(_)
                | RepositoryError::InvalidData(_)
                | RepositoryError::Unavailable(_)
                | RepositoryError::Storage(_) => ErrorKind::Storage,
            },
        }
    }
}

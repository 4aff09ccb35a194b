//! Academic-year registry and the year-end lifecycle (close, archive graduates, promote).
//!
//! The lifecycle planners in [`lifecycle`] are pure; [`sqlite::SqliteSchoolStore`] runs them
//! inside one transaction per command and re-checks every row it writes.

pub mod access;
pub mod domain;
pub mod lifecycle;
pub mod repository;
pub mod router;
pub mod service;
pub mod sqlite;
pub mod validation;

#[cfg(test)]
mod tests;

pub use access::{AccessError, Role, ROLE_HEADER};
pub use domain::{
    AcademicYear, AcademicYearId, AcademicYearStatus, ExamScore, Grade, GradeId, SchoolSection,
    Student, StudentId, StudentStatus,
};
pub use lifecycle::{LifecycleCommand, LifecycleStep, LifecycleSummary, RosterPlan};
pub use repository::{AcademicYearStore, RepositoryError, RosterStore};
pub use router::{academic_year_router, AcademicYearView, LifecycleView};
pub use service::{AcademicYearService, AcademicYearServiceError, ErrorKind};
pub use sqlite::SqliteSchoolStore;
pub use validation::{
    AcademicYearRequest, ExamScoreRequest, NewGradeRequest, NewStudentRequest, ValidationError,
};

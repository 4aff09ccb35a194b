use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for an academic year row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcademicYearId(pub i64);

/// Identifier for a grade (class) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradeId(pub i64);

/// Identifier for a student row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub i64);

macro_rules! display_id {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_id!(AcademicYearId, GradeId, StudentId);

/// Where a year sits in its year-end lifecycle.
///
/// ```text
/// open -> closed -> [graduates_archived] -> promoted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicYearStatus {
    Open,
    Closed,
    GraduatesArchived,
    Promoted,
}

impl AcademicYearStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AcademicYearStatus::Open => "open",
            AcademicYearStatus::Closed => "closed",
            AcademicYearStatus::GraduatesArchived => "graduates_archived",
            AcademicYearStatus::Promoted => "promoted",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "open" => Some(AcademicYearStatus::Open),
            "closed" => Some(AcademicYearStatus::Closed),
            "graduates_archived" => Some(AcademicYearStatus::GraduatesArchived),
            "promoted" => Some(AcademicYearStatus::Promoted),
            _ => None,
        }
    }

    /// Only an open year takes new scores or can become the active year.
    pub const fn accepts_scores(self) -> bool {
        matches!(self, AcademicYearStatus::Open)
    }
}

/// Persisted academic year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicYear {
    pub id: AcademicYearId,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub status: AcademicYearStatus,
}

/// Form 1-6 is the new secondary curriculum; Grade 8-12 the legacy one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchoolSection {
    NeoSecondary,
    LegacySecondary,
}

impl SchoolSection {
    pub const fn label(self) -> &'static str {
        match self {
            SchoolSection::NeoSecondary => "neo_secondary",
            SchoolSection::LegacySecondary => "legacy_secondary",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "neo_secondary" => Some(SchoolSection::NeoSecondary),
            "legacy_secondary" => Some(SchoolSection::LegacySecondary),
            _ => None,
        }
    }
}

/// A class at one level of a section, e.g. "Form 2 Blue".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub id: GradeId,
    pub name: String,
    pub stream: String,
    pub level: u8,
    pub section: SchoolSection,
    /// Lookup key into the staff directory; the grade does not own the teacher.
    pub homeroom_teacher_id: Option<i64>,
    pub is_active: bool,
}

impl Grade {
    pub fn full_name(&self) -> String {
        if self.stream.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.stream)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Archived,
}

impl StudentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Archived => "archived",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "active" => Some(StudentStatus::Active),
            "archived" => Some(StudentStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub grade_id: GradeId,
    pub status: StudentStatus,
    /// Year whose lifecycle graduated the student, if any.
    pub graduated_in: Option<AcademicYearId>,
}

impl Student {
    /// "LastName FirstName", the order rosters are printed in.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name.trim(), self.first_name.trim())
            .trim()
            .to_string()
    }
}

/// A single subject score for one term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamScore {
    pub student_id: StudentId,
    pub academic_year_id: AcademicYearId,
    pub subject: String,
    pub term: u8,
    pub score: Option<f32>,
    pub is_absent: bool,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in [
            AcademicYearStatus::Open,
            AcademicYearStatus::Closed,
            AcademicYearStatus::GraduatesArchived,
            AcademicYearStatus::Promoted,
        ] {
            assert_eq!(AcademicYearStatus::from_label(status.label()), Some(status));
        }
        assert_eq!(AcademicYearStatus::from_label("archived"), None);
    }

    #[test]
    fn grade_full_name_skips_empty_stream() {
        let mut grade = Grade {
            id: GradeId(1),
            name: "Form 1".to_string(),
            stream: String::new(),
            level: 1,
            section: SchoolSection::NeoSecondary,
            homeroom_teacher_id: None,
            is_active: true,
        };
        assert_eq!(grade.full_name(), "Form 1");
        grade.stream = "Blue".to_string();
        assert_eq!(grade.full_name(), "Form 1 Blue");
    }

    #[test]
    fn student_display_name_puts_last_name_first() {
        let student = Student {
            id: StudentId(4),
            first_name: " Anna ".to_string(),
            last_name: "Banda".to_string(),
            grade_id: GradeId(1),
            status: StudentStatus::Active,
            graduated_in: None,
        };
        assert_eq!(student.display_name(), "Banda Anna");
    }
}

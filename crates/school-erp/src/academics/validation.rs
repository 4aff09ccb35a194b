//! Boundary checks for inbound requests.
//!
//! Requests are deserialized into closed structs (unknown fields are rejected) and then
//! turned into drafts that the store can persist without further checks.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AcademicYearId, GradeId, SchoolSection, StudentId};
use crate::config::CalendarConfig;

pub const MIN_SCORE: f32 = 0.0;
pub const MAX_SCORE: f32 = 100.0;
pub const TERMS_PER_YEAR: u8 = 3;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} '{value}' is not an ISO-8601 date or timestamp")]
    MalformedDate { field: &'static str, value: String },
    #[error("start date {start} must be before end date {end}")]
    StartNotBeforeEnd {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("score {score} is outside 0-100")]
    ScoreOutOfRange { score: f32 },
    #[error("term {term} is outside 1-3")]
    TermOutOfRange { term: u8 },
    #[error("grade level must be at least 1")]
    LevelOutOfRange,
}

/// Create/update body for an academic year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AcademicYearRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Validated, normalized academic year fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcademicYearDraft {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl AcademicYearRequest {
    pub fn new(name: impl Into<String>, start_date: &str, end_date: &str) -> Self {
        Self {
            name: Some(name.into()),
            start_date: Some(start_date.to_string()),
            end_date: Some(end_date.to_string()),
        }
    }

    pub fn validate(
        &self,
        calendar: &CalendarConfig,
    ) -> Result<AcademicYearDraft, ValidationError> {
        let name = required_text(self.name.as_deref(), "Academic year name")?;
        let start_date = required_timestamp(
            self.start_date.as_deref(),
            "startDate",
            calendar.school_offset,
        )?;
        let end_date =
            required_timestamp(self.end_date.as_deref(), "endDate", calendar.school_offset)?;

        if start_date >= end_date {
            return Err(ValidationError::StartNotBeforeEnd {
                start: start_date,
                end: end_date,
            });
        }

        Ok(AcademicYearDraft {
            name,
            start_date,
            end_date,
        })
    }
}

/// Raised when a timestamp matches none of the accepted shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedTimestamp;

/// Normalizes a caller-supplied timestamp to UTC.
///
/// Offset-less values are read in `local_offset`. An empty string or the
/// `0001-01-01T00:00:00` default sentinel count as unset and yield `Ok(None)`.
pub fn normalize_timestamp(
    raw: &str,
    local_offset: FixedOffset,
) -> Result<Option<DateTime<Utc>>, MalformedTimestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        if is_unset_sentinel(&parsed.naive_local()) {
            return Ok(None);
        }
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or(MalformedTimestamp)?;

    if is_unset_sentinel(&naive) {
        return Ok(None);
    }

    local_offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| Some(local.with_timezone(&Utc)))
        .ok_or(MalformedTimestamp)
}

fn is_unset_sentinel(value: &NaiveDateTime) -> bool {
    value.year() == 1
        && value.ordinal() == 1
        && value.num_seconds_from_midnight() == 0
        && value.nanosecond() == 0
}

fn required_timestamp(
    raw: Option<&str>,
    field: &'static str,
    local_offset: FixedOffset,
) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.ok_or(ValidationError::Required { field })?;
    normalize_timestamp(raw, local_offset)
        .map_err(|MalformedTimestamp| ValidationError::MalformedDate {
            field,
            value: raw.to_string(),
        })?
        .ok_or(ValidationError::Required { field })
}

fn required_text(raw: Option<&str>, field: &'static str) -> Result<String, ValidationError> {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ValidationError::Required { field }),
    }
}

/// Score entry body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExamScoreRequest {
    pub student_id: i64,
    pub academic_year_id: i64,
    #[serde(default)]
    pub subject: Option<String>,
    pub term: u8,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub is_absent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEntry {
    pub student_id: StudentId,
    pub academic_year_id: AcademicYearId,
    pub subject: String,
    pub term: u8,
    pub score: Option<f32>,
    pub is_absent: bool,
}

impl ExamScoreRequest {
    /// An absent mark drops whatever score came with it.
    pub fn validate(&self) -> Result<ScoreEntry, ValidationError> {
        let subject = required_text(self.subject.as_deref(), "subject")?;
        if self.term == 0 || self.term > TERMS_PER_YEAR {
            return Err(ValidationError::TermOutOfRange { term: self.term });
        }

        let score = if self.is_absent {
            None
        } else {
            let score = self.score.ok_or(ValidationError::Required { field: "score" })?;
            if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
                return Err(ValidationError::ScoreOutOfRange { score });
            }
            Some(score)
        };

        Ok(ScoreEntry {
            student_id: StudentId(self.student_id),
            academic_year_id: AcademicYearId(self.academic_year_id),
            subject,
            term: self.term,
            score,
            is_absent: self.is_absent,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewGradeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stream: Option<String>,
    pub level: u8,
    pub section: SchoolSection,
    #[serde(default)]
    pub homeroom_teacher_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrade {
    pub name: String,
    pub stream: String,
    pub level: u8,
    pub section: SchoolSection,
    pub homeroom_teacher_id: Option<i64>,
}

impl NewGradeRequest {
    pub fn validate(&self) -> Result<NewGrade, ValidationError> {
        let name = required_text(self.name.as_deref(), "grade name")?;
        if self.level == 0 {
            return Err(ValidationError::LevelOutOfRange);
        }
        Ok(NewGrade {
            name,
            stream: self.stream.as_deref().unwrap_or_default().trim().to_string(),
            level: self.level,
            section: self.section,
            homeroom_teacher_id: self.homeroom_teacher_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewStudentRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    pub grade_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub grade_id: GradeId,
}

impl NewStudentRequest {
    pub fn validate(&self) -> Result<NewStudent, ValidationError> {
        Ok(NewStudent {
            first_name: required_text(self.first_name.as_deref(), "firstName")?,
            last_name: required_text(self.last_name.as_deref(), "lastName")?,
            grade_id: GradeId(self.grade_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lusaka() -> CalendarConfig {
        CalendarConfig {
            school_offset: FixedOffset::east_opt(2 * 3600).expect("valid offset"),
        }
    }

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    #[test]
    fn date_only_values_are_read_in_school_offset() {
        let draft = AcademicYearRequest::new("2024-2025", "2024-09-01", "2025-06-30")
            .validate(&lusaka())
            .expect("valid request");

        assert_eq!(draft.name, "2024-2025");
        assert_eq!(draft.start_date, utc("2024-08-31T22:00:00Z"));
        assert_eq!(draft.end_date, utc("2025-06-29T22:00:00Z"));
    }

    #[test]
    fn explicit_offsets_are_respected() {
        let draft = AcademicYearRequest::new(
            "  2025-2026 ",
            "2025-09-01T08:00:00+05:00",
            "2026-06-30T00:00:00Z",
        )
        .validate(&lusaka())
        .expect("valid request");

        assert_eq!(draft.name, "2025-2026");
        assert_eq!(draft.start_date, utc("2025-09-01T03:00:00Z"));
        assert_eq!(draft.end_date, utc("2026-06-30T00:00:00Z"));
    }

    #[test]
    fn whitespace_name_is_rejected() {
        let err = AcademicYearRequest::new("   ", "2024-09-01", "2025-06-30")
            .validate(&lusaka())
            .expect_err("blank name");
        assert_eq!(
            err,
            ValidationError::Required {
                field: "Academic year name"
            }
        );
        assert_eq!(err.to_string(), "Academic year name is required");
    }

    #[test]
    fn default_sentinel_counts_as_unset() {
        let err = AcademicYearRequest::new("2024-2025", "0001-01-01T00:00:00", "2025-06-30")
            .validate(&lusaka())
            .expect_err("sentinel start date");
        assert_eq!(err, ValidationError::Required { field: "startDate" });

        let err = AcademicYearRequest {
            end_date: None,
            ..AcademicYearRequest::new("2024-2025", "2024-09-01", "")
        }
        .validate(&lusaka())
        .expect_err("missing end date");
        assert_eq!(err, ValidationError::Required { field: "endDate" });
    }

    #[test]
    fn garbage_dates_are_reported() {
        let err = AcademicYearRequest::new("2024-2025", "first of september", "2025-06-30")
            .validate(&lusaka())
            .expect_err("unparseable");
        assert!(matches!(
            err,
            ValidationError::MalformedDate {
                field: "startDate",
                ..
            }
        ));
    }

    #[test]
    fn start_must_precede_end() {
        let err = AcademicYearRequest::new("2024-2025", "2025-06-30", "2024-09-01")
            .validate(&lusaka())
            .expect_err("inverted range");
        assert!(matches!(err, ValidationError::StartNotBeforeEnd { .. }));
    }

    #[test]
    fn unknown_fields_are_rejected_at_the_boundary() {
        let parsed = serde_json::from_str::<AcademicYearRequest>(
            r#"{"name":"2024","startDate":"2024-09-01","endDate":"2025-06-30","isActive":true}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn absent_scores_drop_the_value() {
        let entry = ExamScoreRequest {
            student_id: 1,
            academic_year_id: 2,
            subject: Some("Mathematics".to_string()),
            term: 1,
            score: Some(55.0),
            is_absent: true,
        }
        .validate()
        .expect("absent entry");
        assert_eq!(entry.score, None);
        assert!(entry.is_absent);
    }

    #[test]
    fn score_range_and_term_are_enforced() {
        let base = ExamScoreRequest {
            student_id: 1,
            academic_year_id: 2,
            subject: Some("Biology".to_string()),
            term: 2,
            score: Some(100.5),
            is_absent: false,
        };
        assert_eq!(
            base.validate(),
            Err(ValidationError::ScoreOutOfRange { score: 100.5 })
        );

        let no_score = ExamScoreRequest {
            score: None,
            ..base.clone()
        };
        assert_eq!(
            no_score.validate(),
            Err(ValidationError::Required { field: "score" })
        );

        let bad_term = ExamScoreRequest {
            term: 4,
            score: Some(40.0),
            ..base
        };
        assert_eq!(
            bad_term.validate(),
            Err(ValidationError::TermOutOfRange { term: 4 })
        );
    }

    #[test]
    fn grade_requests_need_a_name_and_level() {
        let request = NewGradeRequest {
            name: Some("Form 1".to_string()),
            stream: None,
            level: 0,
            section: SchoolSection::NeoSecondary,
            homeroom_teacher_id: None,
        };
        assert_eq!(request.validate(), Err(ValidationError::LevelOutOfRange));

        let grade = NewGradeRequest { level: 1, ..request }
            .validate()
            .expect("valid grade");
        assert_eq!(grade.stream, "");
    }
}

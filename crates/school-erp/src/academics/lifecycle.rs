//! Year-end state machine and roster planning.
//!
//! Everything here is pure: the store loads a [`RosterSnapshot`] inside its transaction,
//! asks for a [`RosterPlan`], and writes the plan back before committing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{AcademicYearId, AcademicYearStatus, Grade, GradeId, Student, StudentId};

pub type Planner = fn(&RosterSnapshot) -> Result<RosterPlan, PlanError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStep {
    Close,
    ArchiveGraduates,
    PromoteAll,
}

impl LifecycleStep {
    pub const fn label(self) -> &'static str {
        match self {
            LifecycleStep::Close => "close",
            LifecycleStep::ArchiveGraduates => "archive-graduates",
            LifecycleStep::PromoteAll => "promote-all",
        }
    }

    /// Status the year moves to when this step runs from `from`.
    pub fn next_status(
        self,
        from: AcademicYearStatus,
    ) -> Result<AcademicYearStatus, TransitionError> {
        use AcademicYearStatus::*;

        match (self, from) {
            (LifecycleStep::Close, Open) => Ok(Closed),
            (LifecycleStep::ArchiveGraduates, Closed) => Ok(GraduatesArchived),
            (LifecycleStep::PromoteAll, Closed | GraduatesArchived) => Ok(Promoted),
            (step, from) => Err(TransitionError { step, from }),
        }
    }

    /// Roster planner the step runs, if it touches students at all.
    pub fn planner(self) -> Option<Planner> {
        match self {
            LifecycleStep::Close => None,
            LifecycleStep::ArchiveGraduates => Some(plan_graduation as Planner),
            LifecycleStep::PromoteAll => Some(plan_promotion as Planner),
        }
    }
}

/// What an administrator asked for: one step, or the whole year-end in one go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    Step(LifecycleStep),
    Rollover,
}

impl LifecycleCommand {
    pub fn steps(self, from: AcademicYearStatus) -> Result<Vec<LifecycleStep>, TransitionError> {
        match self {
            LifecycleCommand::Step(step) => {
                step.next_status(from)?;
                Ok(vec![step])
            }
            LifecycleCommand::Rollover => rollover_steps(from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} an academic year that is {}", .step.label(), .from.label())]
pub struct TransitionError {
    pub step: LifecycleStep,
    pub from: AcademicYearStatus,
}

/// Steps a one-shot rollover runs from the current status.
pub fn rollover_steps(from: AcademicYearStatus) -> Result<Vec<LifecycleStep>, TransitionError> {
    let steps = match from {
        AcademicYearStatus::Open => vec![
            LifecycleStep::Close,
            LifecycleStep::ArchiveGraduates,
            LifecycleStep::PromoteAll,
        ],
        AcademicYearStatus::Closed => {
            vec![LifecycleStep::ArchiveGraduates, LifecycleStep::PromoteAll]
        }
        AcademicYearStatus::GraduatesArchived => vec![LifecycleStep::PromoteAll],
        AcademicYearStatus::Promoted => {
            return Err(TransitionError {
                step: LifecycleStep::PromoteAll,
                from,
            })
        }
    };
    Ok(steps)
}

/// Active students and every grade, read inside the lifecycle transaction.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    pub grades: Vec<Grade>,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StudentMove {
    pub student_id: StudentId,
    pub from: GradeId,
    pub to: GradeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Graduation {
    pub student_id: StudentId,
    pub from: GradeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterPlan {
    pub promotions: Vec<StudentMove>,
    pub graduations: Vec<Graduation>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("student {student_id} references unknown grade {grade_id}")]
    UnknownGrade {
        student_id: StudentId,
        grade_id: GradeId,
    },
}

/// The grade a student in `grade` moves to: level + 1 in the same section, same stream
/// when one exists, otherwise the lowest id at that level. `None` marks a terminal grade.
pub fn successor_of<'a>(grade: &Grade, grades: &'a [Grade]) -> Option<&'a Grade> {
    let next_level = grade.level.checked_add(1)?;
    let mut candidates: Vec<&Grade> = grades
        .iter()
        .filter(|candidate| {
            candidate.is_active
                && candidate.section == grade.section
                && candidate.level == next_level
        })
        .collect();
    candidates.sort_by_key(|candidate| candidate.id);

    candidates
        .iter()
        .find(|candidate| candidate.stream.eq_ignore_ascii_case(&grade.stream))
        .or_else(|| candidates.first())
        .copied()
}

/// Moves every active student up one level; students with nowhere to go graduate.
pub fn plan_promotion(snapshot: &RosterSnapshot) -> Result<RosterPlan, PlanError> {
    plan(snapshot, true)
}

/// Graduates every active student sitting in a terminal grade and moves nobody else.
pub fn plan_graduation(snapshot: &RosterSnapshot) -> Result<RosterPlan, PlanError> {
    plan(snapshot, false)
}

fn plan(snapshot: &RosterSnapshot, promote: bool) -> Result<RosterPlan, PlanError> {
    let by_id: BTreeMap<GradeId, &Grade> =
        snapshot.grades.iter().map(|grade| (grade.id, grade)).collect();

    let mut plan = RosterPlan::default();
    for student in &snapshot.students {
        let grade = by_id
            .get(&student.grade_id)
            .ok_or(PlanError::UnknownGrade {
                student_id: student.id,
                grade_id: student.grade_id,
            })?;

        match successor_of(grade, &snapshot.grades) {
            Some(next) if promote => plan.promotions.push(StudentMove {
                student_id: student.id,
                from: grade.id,
                to: next.id,
            }),
            Some(_) => {}
            None => plan.graduations.push(Graduation {
                student_id: student.id,
                from: grade.id,
            }),
        }
    }

    Ok(plan)
}

/// Outcome of one lifecycle command, reported as a single result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleSummary {
    pub academic_year_id: AcademicYearId,
    pub status: AcademicYearStatus,
    pub steps: Vec<LifecycleStep>,
    pub promoted: usize,
    pub graduated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academics::domain::{SchoolSection, StudentStatus};

    fn grade(id: i64, level: u8, stream: &str, section: SchoolSection) -> Grade {
        Grade {
            id: GradeId(id),
            name: format!("Level {level}"),
            stream: stream.to_string(),
            level,
            section,
            homeroom_teacher_id: None,
            is_active: true,
        }
    }

    fn student(id: i64, grade_id: i64) -> Student {
        Student {
            id: StudentId(id),
            first_name: format!("Student{id}"),
            last_name: "Phiri".to_string(),
            grade_id: GradeId(grade_id),
            status: StudentStatus::Active,
            graduated_in: None,
        }
    }

    #[test]
    fn transitions_follow_the_year_end_order() {
        use AcademicYearStatus::*;

        assert_eq!(LifecycleStep::Close.next_status(Open), Ok(Closed));
        assert_eq!(
            LifecycleStep::ArchiveGraduates.next_status(Closed),
            Ok(GraduatesArchived)
        );
        assert_eq!(LifecycleStep::PromoteAll.next_status(Closed), Ok(Promoted));
        assert_eq!(
            LifecycleStep::PromoteAll.next_status(GraduatesArchived),
            Ok(Promoted)
        );

        let err = LifecycleStep::PromoteAll
            .next_status(Open)
            .expect_err("open years cannot be promoted");
        assert_eq!(err.to_string(), "cannot promote-all an academic year that is open");
        assert!(LifecycleStep::Close.next_status(Closed).is_err());
        assert!(LifecycleStep::PromoteAll.next_status(Promoted).is_err());
        assert!(LifecycleStep::ArchiveGraduates.next_status(Promoted).is_err());
    }

    #[test]
    fn single_step_commands_validate_up_front() {
        let err = LifecycleCommand::Step(LifecycleStep::ArchiveGraduates)
            .steps(AcademicYearStatus::GraduatesArchived)
            .expect_err("archive runs once");
        assert_eq!(err.step, LifecycleStep::ArchiveGraduates);
        assert!(LifecycleStep::Close.planner().is_none());
        assert!(LifecycleStep::PromoteAll.planner().is_some());
    }

    #[test]
    fn rollover_resumes_from_partial_progress() {
        assert_eq!(
            rollover_steps(AcademicYearStatus::Closed).expect("closed year rolls over"),
            vec![LifecycleStep::ArchiveGraduates, LifecycleStep::PromoteAll]
        );
        assert!(rollover_steps(AcademicYearStatus::Promoted).is_err());
    }

    #[test]
    fn successor_prefers_matching_stream_within_section() {
        let grades = vec![
            grade(1, 1, "Blue", SchoolSection::NeoSecondary),
            grade(2, 2, "Grey", SchoolSection::NeoSecondary),
            grade(3, 2, "Blue", SchoolSection::NeoSecondary),
            grade(4, 2, "Blue", SchoolSection::LegacySecondary),
        ];
        let next = successor_of(&grades[0], &grades).expect("has successor");
        assert_eq!(next.id, GradeId(3));

        let orphan_stream = grade(5, 1, "Red", SchoolSection::NeoSecondary);
        let next = successor_of(&orphan_stream, &grades).expect("falls back to lowest id");
        assert_eq!(next.id, GradeId(2));
    }

    #[test]
    fn inactive_grades_are_never_targets() {
        let mut grades = vec![
            grade(1, 5, "", SchoolSection::NeoSecondary),
            grade(2, 6, "", SchoolSection::NeoSecondary),
        ];
        grades[1].is_active = false;
        assert!(successor_of(&grades[0], &grades).is_none());
    }

    #[test]
    fn promotion_plan_graduates_terminal_students() {
        let snapshot = RosterSnapshot {
            grades: vec![
                grade(1, 5, "", SchoolSection::NeoSecondary),
                grade(2, 6, "", SchoolSection::NeoSecondary),
                grade(3, 12, "", SchoolSection::LegacySecondary),
            ],
            students: vec![student(10, 1), student(11, 2), student(12, 3)],
        };

        let plan = plan_promotion(&snapshot).expect("plan builds");
        assert_eq!(
            plan.promotions,
            vec![StudentMove {
                student_id: StudentId(10),
                from: GradeId(1),
                to: GradeId(2),
            }]
        );
        let graduates: Vec<StudentId> = plan.graduations.iter().map(|g| g.student_id).collect();
        assert_eq!(graduates, vec![StudentId(11), StudentId(12)]);

        let graduation_only = plan_graduation(&snapshot).expect("plan builds");
        assert!(graduation_only.promotions.is_empty());
        assert_eq!(graduation_only.graduations, plan.graduations);
    }

    #[test]
    fn dangling_grade_reference_fails_the_plan() {
        let snapshot = RosterSnapshot {
            grades: vec![grade(1, 1, "", SchoolSection::NeoSecondary)],
            students: vec![student(7, 99)],
        };
        assert_eq!(
            plan_promotion(&snapshot),
            Err(PlanError::UnknownGrade {
                student_id: StudentId(7),
                grade_id: GradeId(99),
            })
        );
    }
}

//! SQLite implementation of the registry and roster stores.
//!
//! All writes run in `BEGIN IMMEDIATE` transactions so concurrent commands serialize on the
//! database write lock, and every roster update re-checks the row it planned against.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use super::domain::{
    AcademicYear, AcademicYearId, AcademicYearStatus, ExamScore, Grade, GradeId, SchoolSection,
    Student, StudentId, StudentStatus,
};
use super::lifecycle::{LifecycleCommand, LifecycleSummary, RosterPlan, RosterSnapshot};
use super::repository::{AcademicYearStore, RepoResult, RepositoryError, RosterStore};
use super::validation::{AcademicYearDraft, NewGrade, NewStudent, ScoreEntry};
use crate::config::DatabaseConfig;
use crate::db::{open_database, open_db_in_memory, DbResult};

const YEAR_SELECT_SQL: &str = "SELECT
    id,
    name,
    start_date,
    end_date,
    is_active,
    status
FROM academic_years";

const GRADE_SELECT_SQL: &str = "SELECT
    id,
    name,
    stream,
    level,
    section,
    homeroom_teacher_id,
    is_active
FROM grades";

const STUDENT_SELECT_SQL: &str = "SELECT
    id,
    first_name,
    last_name,
    grade_id,
    status,
    graduated_in
FROM students";

const SCORE_SELECT_SQL: &str = "SELECT
    student_id,
    academic_year_id,
    subject,
    term,
    score,
    is_absent,
    recorded_at
FROM exam_scores";

/// Registry and roster storage over a single SQLite connection.
pub struct SqliteSchoolStore {
    conn: Mutex<Connection>,
}

impl SqliteSchoolStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Opens (and migrates) the configured database.
    pub fn open(config: &DatabaseConfig) -> DbResult<Self> {
        open_database(config).map(Self::new)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        open_db_in_memory().map(Self::new)
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("connection mutex poisoned".to_string()))
    }

    fn write<T>(&self, op: impl FnOnce(&Transaction<'_>) -> RepoResult<T>) -> RepoResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl AcademicYearStore for SqliteSchoolStore {
    fn insert_year(&self, draft: &AcademicYearDraft) -> RepoResult<AcademicYear> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO academic_years (name, start_date, end_date, is_active, status)
                 VALUES (?1, ?2, ?3, 0, ?4);",
                params![
                    draft.name,
                    draft.start_date,
                    draft.end_date,
                    AcademicYearStatus::Open
                ],
            )
            .map_err(|err| duplicate_name(err, &draft.name))?;

            let id = AcademicYearId(tx.last_insert_rowid());
            fetch_year(tx, id)?.ok_or(RepositoryError::year_not_found(id))
        })
    }

    fn update_year(
        &self,
        id: AcademicYearId,
        draft: &AcademicYearDraft,
    ) -> RepoResult<AcademicYear> {
        self.write(|tx| {
            let changed = tx
                .execute(
                    "UPDATE academic_years
                     SET name = ?1, start_date = ?2, end_date = ?3
                     WHERE id = ?4;",
                    params![draft.name, draft.start_date, draft.end_date, id],
                )
                .map_err(|err| duplicate_name(err, &draft.name))?;
            if changed == 0 {
                return Err(RepositoryError::year_not_found(id));
            }
            fetch_year(tx, id)?.ok_or(RepositoryError::year_not_found(id))
        })
    }

    fn fetch_year(&self, id: AcademicYearId) -> RepoResult<Option<AcademicYear>> {
        let conn = self.lock()?;
        fetch_year(&conn, id)
    }

    fn list_years(&self) -> RepoResult<Vec<AcademicYear>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{YEAR_SELECT_SQL} ORDER BY start_date, id;"))?;
        let years = stmt
            .query_map([], year_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(years)
    }

    fn fetch_active_year(&self) -> RepoResult<Option<AcademicYear>> {
        let conn = self.lock()?;
        let year = conn
            .query_row(
                &format!("{YEAR_SELECT_SQL} WHERE is_active = 1;"),
                [],
                year_from_row,
            )
            .optional()?;
        Ok(year)
    }

    fn delete_year(&self, id: AcademicYearId) -> RepoResult<()> {
        self.write(|tx| {
            if fetch_year(tx, id)?.is_none() {
                return Err(RepositoryError::year_not_found(id));
            }

            let scores = count_where(tx, "exam_scores", "academic_year_id", id)?;
            let report_cards = count_where(tx, "report_cards", "academic_year_id", id)?;
            let graduates = count_where(tx, "students", "graduated_in", id)?;
            if scores + report_cards + graduates > 0 {
                return Err(RepositoryError::Referenced {
                    id,
                    scores,
                    report_cards,
                    graduates,
                });
            }

            tx.execute("DELETE FROM academic_years WHERE id = ?1;", [id])?;
            Ok(())
        })
    }

    fn activate_year(&self, id: AcademicYearId) -> RepoResult<AcademicYear> {
        self.write(|tx| {
            let year = fetch_year(tx, id)?.ok_or(RepositoryError::year_not_found(id))?;
            if !year.status.accepts_scores() {
                return Err(RepositoryError::Conflict(format!(
                    "academic year {id} is {} and cannot be activated",
                    year.status.label()
                )));
            }
            if year.is_active {
                return Ok(year);
            }

            tx.execute(
                "UPDATE academic_years SET is_active = 0 WHERE is_active = 1;",
                [],
            )?;
            tx.execute(
                "UPDATE academic_years SET is_active = 1 WHERE id = ?1;",
                [id],
            )?;
            fetch_year(tx, id)?.ok_or(RepositoryError::year_not_found(id))
        })
    }

    fn run_lifecycle(
        &self,
        id: AcademicYearId,
        command: LifecycleCommand,
    ) -> RepoResult<LifecycleSummary> {
        self.write(|tx| {
            let year = fetch_year(tx, id)?.ok_or(RepositoryError::year_not_found(id))?;
            let steps = command.steps(year.status)?;

            let mut status = year.status;
            let mut promoted = 0;
            let mut graduated = 0;
            for step in &steps {
                let next = step.next_status(status)?;
                if let Some(planner) = step.planner() {
                    let snapshot = load_roster(tx)?;
                    let plan = planner(&snapshot)?;
                    apply_roster_plan(tx, id, &plan)?;
                    promoted += plan.promotions.len();
                    graduated += plan.graduations.len();
                }
                debug!(
                    academic_year_id = id.0,
                    step = step.label(),
                    from = status.label(),
                    to = next.label(),
                    "lifecycle step applied"
                );
                status = next;
            }

            tx.execute(
                "UPDATE academic_years SET status = ?1, is_active = 0 WHERE id = ?2;",
                params![status, id],
            )?;

            Ok(LifecycleSummary {
                academic_year_id: id,
                status,
                steps,
                promoted,
                graduated,
            })
        })
    }
}

impl RosterStore for SqliteSchoolStore {
    fn insert_grade(&self, grade: &NewGrade) -> RepoResult<Grade> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO grades (name, stream, level, section, homeroom_teacher_id, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1);",
                params![
                    grade.name,
                    grade.stream,
                    grade.level,
                    grade.section,
                    grade.homeroom_teacher_id
                ],
            )?;
            let id = GradeId(tx.last_insert_rowid());
            let grade = tx.query_row(
                &format!("{GRADE_SELECT_SQL} WHERE id = ?1;"),
                [id],
                grade_from_row,
            )?;
            Ok(grade)
        })
    }

    fn list_grades(&self) -> RepoResult<Vec<Grade>> {
        let conn = self.lock()?;
        load_grades(&conn)
    }

    fn insert_student(&self, student: &NewStudent) -> RepoResult<Student> {
        self.write(|tx| {
            let grade_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM grades WHERE id = ?1);",
                [student.grade_id],
                |row| row.get(0),
            )?;
            if !grade_exists {
                return Err(RepositoryError::NotFound {
                    entity: "grade",
                    id: student.grade_id.0,
                });
            }

            tx.execute(
                "INSERT INTO students (first_name, last_name, grade_id, status)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    student.first_name,
                    student.last_name,
                    student.grade_id,
                    StudentStatus::Active
                ],
            )?;
            let id = StudentId(tx.last_insert_rowid());
            fetch_student(tx, id)?.ok_or(RepositoryError::student_not_found(id))
        })
    }

    fn fetch_student(&self, id: StudentId) -> RepoResult<Option<Student>> {
        let conn = self.lock()?;
        fetch_student(&conn, id)
    }

    fn list_students(&self, include_archived: bool) -> RepoResult<Vec<Student>> {
        let conn = self.lock()?;
        let sql = if include_archived {
            format!("{STUDENT_SELECT_SQL} ORDER BY last_name, first_name, id;")
        } else {
            format!(
                "{STUDENT_SELECT_SQL} WHERE status = 'active' ORDER BY last_name, first_name, id;"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let students = stmt
            .query_map([], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(students)
    }

    fn record_score(&self, entry: &ScoreEntry) -> RepoResult<ExamScore> {
        self.write(|tx| {
            let year = fetch_year(tx, entry.academic_year_id)?
                .ok_or(RepositoryError::year_not_found(entry.academic_year_id))?;
            if !year.status.accepts_scores() {
                return Err(RepositoryError::Conflict(format!(
                    "academic year {} is {} and no longer accepts scores",
                    year.name,
                    year.status.label()
                )));
            }

            let student = fetch_student(tx, entry.student_id)?
                .ok_or(RepositoryError::student_not_found(entry.student_id))?;
            if student.status != StudentStatus::Active {
                return Err(RepositoryError::Conflict(format!(
                    "student {} is archived and cannot receive new scores",
                    student.id
                )));
            }

            tx.execute(
                "INSERT INTO exam_scores
                    (student_id, academic_year_id, subject, term, score, is_absent, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (student_id, academic_year_id, subject, term) DO UPDATE SET
                    score = excluded.score,
                    is_absent = excluded.is_absent,
                    recorded_at = excluded.recorded_at;",
                params![
                    entry.student_id,
                    entry.academic_year_id,
                    entry.subject,
                    entry.term,
                    entry.score.map(f64::from),
                    entry.is_absent,
                    Utc::now()
                ],
            )?;

            let score = tx.query_row(
                &format!(
                    "{SCORE_SELECT_SQL}
                     WHERE student_id = ?1 AND academic_year_id = ?2 AND subject = ?3 AND term = ?4;"
                ),
                params![
                    entry.student_id,
                    entry.academic_year_id,
                    entry.subject,
                    entry.term
                ],
                score_from_row,
            )?;
            Ok(score)
        })
    }

    fn scores_for_student(&self, id: StudentId) -> RepoResult<Vec<ExamScore>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SCORE_SELECT_SQL} WHERE student_id = ?1 ORDER BY academic_year_id, term, subject;"
        ))?;
        let scores = stmt
            .query_map([id], score_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scores)
    }

    fn record_report_card(
        &self,
        student_id: StudentId,
        academic_year_id: AcademicYearId,
        term: u8,
    ) -> RepoResult<()> {
        self.write(|tx| {
            if fetch_year(tx, academic_year_id)?.is_none() {
                return Err(RepositoryError::year_not_found(academic_year_id));
            }
            if fetch_student(tx, student_id)?.is_none() {
                return Err(RepositoryError::student_not_found(student_id));
            }
            tx.execute(
                "INSERT INTO report_cards (student_id, academic_year_id, term, generated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (student_id, academic_year_id, term) DO UPDATE SET
                    generated_at = excluded.generated_at;",
                params![student_id, academic_year_id, term, Utc::now()],
            )?;
            Ok(())
        })
    }
}

/// Writes a plan, failing the whole transaction if any row moved since it was planned.
fn apply_roster_plan(
    tx: &Transaction<'_>,
    academic_year_id: AcademicYearId,
    plan: &RosterPlan,
) -> RepoResult<()> {
    for step in &plan.promotions {
        let changed = tx.execute(
            "UPDATE students
             SET grade_id = ?1
             WHERE id = ?2
               AND grade_id = ?3
               AND status = 'active'
               AND EXISTS (SELECT 1 FROM grades WHERE id = ?1 AND is_active = 1);",
            params![step.to, step.student_id, step.from],
        )?;
        if changed != 1 {
            warn!(
                student_id = step.student_id.0,
                from = step.from.0,
                to = step.to.0,
                "promotion precondition failed"
            );
            return Err(RepositoryError::Conflict(format!(
                "student {} is no longer active in grade {}; promotion rolled back",
                step.student_id, step.from
            )));
        }
    }

    for graduation in &plan.graduations {
        let changed = tx.execute(
            "UPDATE students
             SET status = 'archived', graduated_in = ?1
             WHERE id = ?2 AND grade_id = ?3 AND status = 'active';",
            params![academic_year_id, graduation.student_id, graduation.from],
        )?;
        if changed != 1 {
            warn!(
                student_id = graduation.student_id.0,
                grade_id = graduation.from.0,
                "graduation precondition failed"
            );
            return Err(RepositoryError::Conflict(format!(
                "student {} is no longer active in grade {}; graduation rolled back",
                graduation.student_id, graduation.from
            )));
        }
    }

    Ok(())
}

fn load_roster(conn: &Connection) -> RepoResult<RosterSnapshot> {
    let grades = load_grades(conn)?;
    let mut stmt = conn.prepare(&format!(
        "{STUDENT_SELECT_SQL} WHERE status = 'active' ORDER BY id;"
    ))?;
    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RosterSnapshot { grades, students })
}

fn load_grades(conn: &Connection) -> RepoResult<Vec<Grade>> {
    let mut stmt = conn.prepare(&format!("{GRADE_SELECT_SQL} ORDER BY section, level, id;"))?;
    let grades = stmt
        .query_map([], grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grades)
}

fn fetch_year(conn: &Connection, id: AcademicYearId) -> RepoResult<Option<AcademicYear>> {
    let year = conn
        .query_row(
            &format!("{YEAR_SELECT_SQL} WHERE id = ?1;"),
            [id],
            year_from_row,
        )
        .optional()?;
    Ok(year)
}

fn fetch_student(conn: &Connection, id: StudentId) -> RepoResult<Option<Student>> {
    let student = conn
        .query_row(
            &format!("{STUDENT_SELECT_SQL} WHERE id = ?1;"),
            [id],
            student_from_row,
        )
        .optional()?;
    Ok(student)
}

fn count_where(
    conn: &Connection,
    table: &str,
    column: &str,
    id: AcademicYearId,
) -> RepoResult<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1;"),
        [id],
        |row| row.get(0),
    )?;
    u64::try_from(count)
        .map_err(|_| RepositoryError::InvalidData(format!("negative count {count}")))
}

fn duplicate_name(err: rusqlite::Error, name: &str) -> RepositoryError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            RepositoryError::Conflict(format!("an academic year named '{name}' already exists"))
        }
        _ => err.into(),
    }
}

fn year_from_row(row: &Row<'_>) -> rusqlite::Result<AcademicYear> {
    Ok(AcademicYear {
        id: row.get(0)?,
        name: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        is_active: row.get(4)?,
        status: row.get(5)?,
    })
}

fn grade_from_row(row: &Row<'_>) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: row.get(0)?,
        name: row.get(1)?,
        stream: row.get(2)?,
        level: row.get(3)?,
        section: row.get(4)?,
        homeroom_teacher_id: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        grade_id: row.get(3)?,
        status: row.get(4)?,
        graduated_in: row.get(5)?,
    })
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<ExamScore> {
    let score: Option<f64> = row.get(4)?;
    Ok(ExamScore {
        student_id: row.get(0)?,
        academic_year_id: row.get(1)?,
        subject: row.get(2)?,
        term: row.get(3)?,
        score: score.map(|value| value as f32),
        is_absent: row.get(5)?,
        recorded_at: row.get(6)?,
    })
}

macro_rules! sql_id {
    ($($ty:ident),*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.0))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    i64::column_result(value).map($ty)
                }
            }
        )*
    };
}

sql_id!(AcademicYearId, GradeId, StudentId);

macro_rules! sql_label {
    ($($ty:ident => $what:literal),*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.label()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let label = value.as_str()?;
                    $ty::from_label(label).ok_or_else(|| {
                        FromSqlError::Other(format!("unknown {} '{label}'", $what).into())
                    })
                }
            }
        )*
    };
}

sql_label!(
    AcademicYearStatus => "academic year status",
    SchoolSection => "school section",
    StudentStatus => "student status"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academics::lifecycle::{Graduation, StudentMove};

    fn seeded() -> (Connection, Vec<StudentId>, Vec<GradeId>) {
        let conn = open_db_in_memory().expect("in-memory db");
        conn.execute_batch(
            "INSERT INTO academic_years (id, name, start_date, end_date, status)
                VALUES (1, '2024', '2024-01-01 00:00:00+00:00', '2024-12-01 00:00:00+00:00', 'closed');
             INSERT INTO grades (id, name, level, section) VALUES
                (1, 'Form 1', 1, 'neo_secondary'),
                (2, 'Form 2', 2, 'neo_secondary');
             INSERT INTO students (id, first_name, last_name, grade_id) VALUES
                (1, 'Anna', 'Banda', 1),
                (2, 'Chanda', 'Mwale', 1),
                (3, 'Mutinta', 'Zulu', 2);",
        )
        .expect("seed");
        (
            conn,
            vec![StudentId(1), StudentId(2), StudentId(3)],
            vec![GradeId(1), GradeId(2)],
        )
    }

    fn grade_of(conn: &Connection, id: StudentId) -> (i64, String) {
        conn.query_row(
            "SELECT grade_id, status FROM students WHERE id = ?1;",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("student row")
    }

    #[test]
    fn stale_plan_rolls_back_every_write() {
        let (mut conn, students, grades) = seeded();

        // The second move claims student 2 sits in grade 2, which is no longer true.
        let plan = RosterPlan {
            promotions: vec![
                StudentMove {
                    student_id: students[0],
                    from: grades[0],
                    to: grades[1],
                },
                StudentMove {
                    student_id: students[1],
                    from: grades[1],
                    to: grades[1],
                },
            ],
            graduations: vec![Graduation {
                student_id: students[2],
                from: grades[1],
            }],
        };

        {
            let tx = conn.transaction().expect("tx");
            let err = apply_roster_plan(&tx, AcademicYearId(1), &plan)
                .expect_err("stale entry must fail");
            assert!(matches!(err, RepositoryError::Conflict(_)));
        }

        assert_eq!(grade_of(&conn, students[0]), (1, "active".to_string()));
        assert_eq!(grade_of(&conn, students[2]), (2, "active".to_string()));
    }

    #[test]
    fn unknown_labels_surface_as_storage_errors() {
        let (conn, _, _) = seeded();
        conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
            .expect("pragma");
        conn.execute(
            "UPDATE academic_years SET status = 'reopened' WHERE id = 1;",
            [],
        )
        .expect("corrupt status");

        let err = fetch_year(&conn, AcademicYearId(1)).expect_err("bad label");
        assert!(matches!(err, RepositoryError::Storage(_)));
    }

    #[test]
    fn section_labels_match_schema_constraint() {
        let (conn, _, _) = seeded();
        let grades = load_grades(&conn).expect("grades load");
        assert!(grades
            .iter()
            .all(|grade| grade.section == SchoolSection::NeoSecondary));
    }
}

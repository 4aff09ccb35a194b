use clap::Args;
use school_erp::academics::{
    AcademicYearRequest, AcademicYearService, ExamScoreRequest, GradeId, LifecycleView,
    NewGradeRequest, NewStudentRequest, SchoolSection, SqliteSchoolStore, StudentStatus,
};
use school_erp::config::CalendarConfig;
use school_erp::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Name of the academic year to roll over.
    #[arg(long, default_value = "2024-2025")]
    pub(crate) year: String,
    /// First day of the year (ISO-8601, school offset when none given).
    #[arg(long, default_value = "2024-09-01")]
    pub(crate) start: String,
    /// Last day of the year (ISO-8601, school offset when none given).
    #[arg(long, default_value = "2025-06-30")]
    pub(crate) end: String,
    /// Run close, archive-graduates and promote-all as separate commands instead of a rollover.
    #[arg(long)]
    pub(crate) step_by_step: bool,
    /// Print the lifecycle summary as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

type DemoService = AcademicYearService<SqliteSchoolStore>;

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let store = Arc::new(SqliteSchoolStore::open_in_memory()?);
    let service = AcademicYearService::new(store, CalendarConfig::default());

    let grades = seed_grades(&service)?;
    seed_students(&service, &grades)?;

    let year = service.create(&AcademicYearRequest::new(
        args.year.as_str(),
        &args.start,
        &args.end,
    ))?;
    service.activate(year.id)?;

    println!("Academic year demo");
    println!(
        "Year {} ({} -> {}), active: {}",
        year.name,
        year.start_date.to_rfc3339(),
        year.end_date.to_rfc3339(),
        service.get_active()?.name
    );

    record_sample_scores(&service, year.id.0)?;
    print_roster(&service, "Roster before year end")?;

    let summaries = if args.step_by_step {
        vec![
            service.close(year.id)?,
            service.archive_graduates(year.id)?,
            service.promote_all(year.id)?,
        ]
    } else {
        vec![service.rollover(year.id)?]
    };

    for summary in summaries {
        let view = LifecycleView::from(summary);
        if args.json {
            match serde_json::to_string_pretty(&view) {
                Ok(json) => println!("{json}"),
                Err(err) => println!("Summary unavailable: {err}"),
            }
        } else {
            let steps: Vec<&str> = view.steps.iter().map(|step| step.label()).collect();
            println!(
                "\nRan {} -> status {}: {} promoted, {} graduated",
                steps.join(", "),
                view.status.label(),
                view.promoted,
                view.graduated
            );
        }
    }

    print_roster(&service, "Roster after year end")?;

    match service.promote_all(year.id) {
        Ok(_) => println!("\nUnexpected: a second promotion succeeded"),
        Err(err) => println!("\nSecond promotion refused: {err}"),
    }

    Ok(())
}

fn seed_grades(service: &DemoService) -> Result<Vec<GradeId>, AppError> {
    let layout = [
        ("Form 1", 1, SchoolSection::NeoSecondary),
        ("Form 2", 2, SchoolSection::NeoSecondary),
        ("Form 3", 3, SchoolSection::NeoSecondary),
        ("Grade 11", 11, SchoolSection::LegacySecondary),
        ("Grade 12", 12, SchoolSection::LegacySecondary),
    ];

    let mut grades = Vec::with_capacity(layout.len());
    for (name, level, section) in layout {
        let grade = service.create_grade(&NewGradeRequest {
            name: Some(name.to_string()),
            stream: Some("Blue".to_string()),
            level,
            section,
            homeroom_teacher_id: None,
        })?;
        grades.push(grade.id);
    }
    Ok(grades)
}

fn seed_students(service: &DemoService, grades: &[GradeId]) -> Result<(), AppError> {
    let names = [
        ("Anna", "Banda"),
        ("Chanda", "Mwale"),
        ("Mutinta", "Zulu"),
        ("Bwalya", "Phiri"),
        ("Natasha", "Tembo"),
    ];

    for ((first, last), grade_id) in names.iter().zip(grades) {
        service.enroll(&NewStudentRequest {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            grade_id: grade_id.0,
        })?;
    }
    Ok(())
}

fn record_sample_scores(service: &DemoService, year_id: i64) -> Result<(), AppError> {
    for (index, student) in service.students(false)?.iter().enumerate() {
        let absent = index % 4 == 3;
        service.record_score(&ExamScoreRequest {
            student_id: student.id.0,
            academic_year_id: year_id,
            subject: Some("Mathematics".to_string()),
            term: 3,
            score: (!absent).then_some(55.0 + index as f32 * 7.5),
            is_absent: absent,
        })?;
    }
    Ok(())
}

fn print_roster(service: &DemoService, title: &str) -> Result<(), AppError> {
    let grades: BTreeMap<_, _> = service
        .grades()?
        .into_iter()
        .map(|grade| (grade.id, grade.full_name()))
        .collect();

    println!("\n{title}");
    for student in service.students(true)? {
        let grade = grades
            .get(&student.grade_id)
            .map(String::as_str)
            .unwrap_or("unknown grade");
        let marker = match student.status {
            StudentStatus::Active => "active",
            StudentStatus::Archived => "graduated",
        };
        let scores = service.scores_for_student(student.id)?.len();
        println!(
            "  {:<18} {:<16} {:<10} {} score(s)",
            student.display_name(),
            grade,
            marker,
            scores
        );
    }
    Ok(())
}

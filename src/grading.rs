use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{self, Action, Caller, Resource};
use crate::errors::OpError;
use crate::model::{Course, Grade, GradeStatus, Student};
use crate::repo;
use crate::store::Store;

/// Sum of the score components that were actually submitted. `None` when no
/// component is present at all; that call is rejected, an all-absent grade
/// row has no meaning.
pub fn total_marks(ca1: Option<f64>, ca2: Option<f64>, exam: Option<f64>) -> Option<f64> {
    if ca1.is_none() && ca2.is_none() && exam.is_none() {
        return None;
    }
    Some(ca1.unwrap_or(0.0) + ca2.unwrap_or(0.0) + exam.unwrap_or(0.0))
}

pub fn status_for(total: f64, pass_mark: f64) -> GradeStatus {
    if total >= pass_mark {
        GradeStatus::Pass
    } else {
        GradeStatus::Fail
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeInput {
    pub student_id: String,
    pub course_id: String,
    pub term: String,
    #[serde(default)]
    pub ca1: Option<f64>,
    #[serde(default)]
    pub ca2: Option<f64>,
    #[serde(default)]
    pub exam: Option<f64>,
    #[serde(default)]
    pub remarks: Option<String>,
}

fn check_component(name: &'static str, v: Option<f64>) -> Result<(), OpError> {
    if let Some(x) = v {
        if !x.is_finite() || x < 0.0 {
            return Err(OpError::validation(format!(
                "{} must be a non-negative number",
                name
            )));
        }
    }
    Ok(())
}

/// One logical grade row per (student, course, term); a second write for the
/// same key replaces the first. Status is recomputed from the submitted
/// scores on every write, so the stored value can never drift from the
/// formula. The gate runs against the owning course before anything is
/// written.
pub fn upsert_grade(
    store: &mut Store,
    caller: &Caller,
    input: &GradeInput,
    pass_mark: f64,
) -> Result<Grade, OpError> {
    store.run_transaction(|tx| {
        let course = repo::get::<Course>(tx, &input.course_id)?;
        auth::require(
            caller,
            &Resource::grade_of_course(course.teacher_id.as_deref()),
            Action::Write,
        )?;

        let student = repo::get::<Student>(tx, &input.student_id)?;

        check_component("ca1", input.ca1)?;
        check_component("ca2", input.ca2)?;
        check_component("exam", input.exam)?;
        let total = total_marks(input.ca1, input.ca2, input.exam).ok_or_else(|| {
            OpError::validation("at least one score component (ca1, ca2, exam) is required")
        })?;
        let status = status_for(total, pass_mark);

        let existing = repo::list::<Grade>(tx, |g| {
            g.student_id == input.student_id
                && g.course_id == input.course_id
                && g.term == input.term
        })?
        .into_iter()
        .next();

        let grade = Grade {
            id: existing
                .as_ref()
                .map(|g| g.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            student_id: student.id.clone(),
            student_name: student.full_name.clone(),
            course_id: course.id.clone(),
            course_name: course.name.clone(),
            ca1: input.ca1,
            ca2: input.ca2,
            exam: input.exam,
            total_marks: total,
            status,
            remarks: input.remarks.clone(),
            term: input.term.clone(),
            entered_by_teacher_id: caller.uid.clone(),
            entered_by_email: caller.email.clone(),
            created_at: String::new(),
            updated_at: String::new(),
        };

        if existing.is_some() {
            repo::update(tx, grade)
        } else {
            repo::create(tx, grade)
        }
    })
}

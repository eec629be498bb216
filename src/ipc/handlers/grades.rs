use std::collections::HashSet;

use serde_json::json;

use crate::auth::{self, Action, Resource, ResourceKind};
use crate::grading::{self, GradeInput};
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, Grade, Role};
use crate::repo;

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let caller = match helpers::caller_of(store, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let input: GradeInput = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    let pass_mark = match helpers::pass_mark(store) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, &e),
    };
    // The ownership gate runs inside, against the course the grade targets.
    match grading::upsert_grade(store, &caller, &input, pass_mark) {
        Ok(grade) => ok(&req.id, json!({ "grade": grade })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let caller = match helpers::caller_of(store, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    // Teachers read grades through the ownership rule, so their listing is
    // scoped to their own courses instead of a blanket read grant.
    if caller.role != Role::Teacher {
        if let Err(resp) = helpers::gate(
            req,
            &caller,
            &Resource::of(ResourceKind::Grade),
            Action::Read,
        ) {
            return resp;
        }
    }

    let student_id = helpers::opt_str_param(req, "studentId");
    let course_id = helpers::opt_str_param(req, "courseId");
    let term = helpers::opt_str_param(req, "term");

    let result = (|| {
        let mut grades = repo::list(&*store, |g: &Grade| {
            student_id
                .as_deref()
                .map(|s| g.student_id == s)
                .unwrap_or(true)
                && course_id.as_deref().map(|c| g.course_id == c).unwrap_or(true)
                && term.as_deref().map(|t| g.term == t).unwrap_or(true)
        })?;
        if caller.role == Role::Teacher {
            let own: HashSet<String> =
                repo::list(&*store, |c: &Course| {
                    c.teacher_id.as_deref() == Some(caller.uid.as_str())
                })?
                .into_iter()
                .map(|c| c.id)
                .collect();
            grades.retain(|g| own.contains(&g.course_id));
        }
        Ok(grades)
    })();
    match result {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let caller = match helpers::caller_of(store, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let grade_id = match helpers::str_param(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = (|| {
        let grade = repo::get::<Grade>(&*store, &grade_id)?;
        // Same scope as writing: the owning course's teacher, or an admin.
        // A grade whose course is gone is admin-only territory.
        let owner = repo::find::<Course>(&*store, &grade.course_id)?
            .and_then(|c| c.teacher_id);
        auth::require(
            &caller,
            &Resource::grade_of_course(owner.as_deref()),
            Action::Write,
        )?;
        repo::delete::<Grade>(&*store, &grade_id)?;
        Ok(())
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        _ => None,
    }
}

use serde_json::json;

use crate::auth::{Action, Resource, ResourceKind};
use crate::ipc::error::{ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::Enrollment;
use crate::repo;

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let caller = match helpers::caller_of(store, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = helpers::gate(
        req,
        &caller,
        &Resource::of(ResourceKind::Enrollment),
        Action::Read,
    ) {
        return resp;
    }
    let student_id = helpers::opt_str_param(req, "studentId");
    let course_id = helpers::opt_str_param(req, "courseId");
    match repo::list(&*store, |e: &Enrollment| {
        student_id
            .as_deref()
            .map(|s| e.student_id == s)
            .unwrap_or(true)
            && course_id
                .as_deref()
                .map(|c| e.course_id == c)
                .unwrap_or(true)
    }) {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        _ => None,
    }
}

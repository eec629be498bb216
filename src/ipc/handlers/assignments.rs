use serde_json::json;

use crate::auth::{Action, Resource, ResourceKind};
use crate::engine;
use crate::ipc::error::{ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::ClassCourseAssignment;
use crate::repo;

fn handle_assignments_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Assignment),
        Action::Write,
    ) {
        return resp;
    }
    let class_id = match helpers::str_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match helpers::str_param(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::assign_course_to_class(store, &class_id, &course_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_assignments_unassign(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Assignment),
        Action::Write,
    ) {
        return resp;
    }
    let class_id = match helpers::str_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_id = match helpers::str_param(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::unassign_course_from_class(store, &class_id, &course_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Assignment),
        Action::Read,
    ) {
        return resp;
    }
    let class_id = helpers::opt_str_param(req, "classId");
    let course_id = helpers::opt_str_param(req, "courseId");
    match repo::list(&*store, |a: &ClassCourseAssignment| {
        class_id
            .as_deref()
            .map(|c| a.class_id == c)
            .unwrap_or(true)
            && course_id
                .as_deref()
                .map(|c| a.course_id == c)
                .unwrap_or(true)
    }) {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.assign" => Some(handle_assignments_assign(state, req)),
        "assignments.unassign" => Some(handle_assignments_unassign(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        _ => None,
    }
}

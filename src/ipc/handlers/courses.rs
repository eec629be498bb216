use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::engine;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::Course;
use crate::repo;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Course),
        Action::Write,
    ) {
        return resp;
    }
    let name = match helpers::str_param(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match helpers::str_param(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let course = Course {
        id: Uuid::new_v4().to_string(),
        name,
        code,
        description: helpers::opt_str_param(req, "description"),
        category: helpers::opt_str_param(req, "category"),
        combination: helpers::opt_str_param(req, "combination"),
        teacher_id: helpers::opt_str_param(req, "teacherId"),
        teacher_name: None,
        created_at: String::new(),
        updated_at: String::new(),
    };
    match engine::create_course(store, &course) {
        Ok(course) => ok(&req.id, json!({ "course": course })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Course),
        Action::Read,
    ) {
        return resp;
    }
    let teacher_id = helpers::opt_str_param(req, "teacherId");
    let category = helpers::opt_str_param(req, "category");
    match repo::list(&*store, |c: &Course| {
        teacher_id
            .as_deref()
            .map(|t| c.teacher_id.as_deref() == Some(t))
            .unwrap_or(true)
            && category
                .as_deref()
                .map(|k| c.category.as_deref() == Some(k))
                .unwrap_or(true)
    }) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Course),
        Action::Write,
    ) {
        return resp;
    }
    let course_id = match helpers::str_param(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch_value) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut patch = engine::CoursePatch::default();
    match helpers::patch_str(patch_value, "name") {
        Ok(v) => patch.name = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_str(patch_value, "code") {
        Ok(v) => patch.code = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "description") {
        Ok(v) => patch.description = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "category") {
        Ok(v) => patch.category = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "combination") {
        Ok(v) => patch.combination = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "teacherId") {
        Ok(v) => patch.teacher_id = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }

    match engine::update_course(store, &course_id, &patch) {
        Ok(course) => ok(&req.id, json!({ "course": course })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Course),
        Action::Write,
    ) {
        return resp;
    }
    let course_id = match helpers::str_param(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::delete_course(store, &course_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}

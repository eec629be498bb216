use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::engine;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::Class;
use crate::repo;

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Class),
        Action::Write,
    ) {
        return resp;
    }
    let name = match helpers::str_param(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let academic_year = match helpers::str_param(req, "academicYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = helpers::opt_str_param(req, "description");

    let class = Class {
        id: Uuid::new_v4().to_string(),
        name,
        description,
        academic_year,
        secretary_id: caller.uid.clone(),
        secretary_name: caller.name(),
        assigned_courses_count: 0,
        created_at: String::new(),
        updated_at: String::new(),
    };
    match repo::create(&*store, class) {
        Ok(class) => ok(&req.id, json!({ "class": class })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Class),
        Action::Read,
    ) {
        return resp;
    }
    let academic_year = helpers::opt_str_param(req, "academicYear");
    match repo::list(&*store, |c: &Class| match &academic_year {
        Some(y) => &c.academic_year == y,
        None => true,
    }) {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Class),
        Action::Write,
    ) {
        return resp;
    }
    let class_id = match helpers::str_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch_value) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut patch = engine::ClassPatch::default();
    match helpers::patch_str(patch_value, "name") {
        Ok(v) => patch.name = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "description") {
        Ok(v) => patch.description = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_str(patch_value, "academicYear") {
        Ok(v) => patch.academic_year = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }

    match engine::update_class(store, &class_id, &patch) {
        Ok(class) => ok(&req.id, json!({ "class": class })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Class),
        Action::Write,
    ) {
        return resp;
    }
    let class_id = match helpers::str_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::delete_class(store, &class_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}

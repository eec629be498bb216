use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::engine;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use crate::repo;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Student),
        Action::Write,
    ) {
        return resp;
    }
    let full_name = match helpers::str_param(req, "fullName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_system_id = match helpers::str_param(req, "studentSystemId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = helpers::opt_str_param(req, "classId");

    let student = Student {
        id: Uuid::new_v4().to_string(),
        full_name,
        student_system_id,
        email: helpers::opt_str_param(req, "email"),
        class_id: None,
        class_name: None,
        gender: helpers::opt_str_param(req, "gender"),
        date_of_birth: helpers::opt_str_param(req, "dateOfBirth"),
        guardian_name: helpers::opt_str_param(req, "guardianName"),
        guardian_phone: helpers::opt_str_param(req, "guardianPhone"),
        created_at: String::new(),
        updated_at: String::new(),
    };
    match engine::create_student(store, &student, class_id.as_deref()) {
        Ok((student, enrollments_created)) => ok(
            &req.id,
            json!({ "student": student, "enrollmentsCreated": enrollments_created }),
        ),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Student),
        Action::Read,
    ) {
        return resp;
    }
    let class_id = helpers::opt_str_param(req, "classId");
    match repo::list(&*store, |s: &Student| match &class_id {
        Some(c) => s.class_id.as_deref() == Some(c.as_str()),
        None => true,
    }) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Student),
        Action::Write,
    ) {
        return resp;
    }
    let student_id = match helpers::str_param(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch_value) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut patch = engine::StudentPatch::default();
    match helpers::patch_str(patch_value, "fullName") {
        Ok(v) => patch.full_name = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_str(patch_value, "studentSystemId") {
        Ok(v) => patch.student_system_id = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "email") {
        Ok(v) => patch.email = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "gender") {
        Ok(v) => patch.gender = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "dateOfBirth") {
        Ok(v) => patch.date_of_birth = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "guardianName") {
        Ok(v) => patch.guardian_name = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }
    match helpers::patch_opt_str(patch_value, "guardianPhone") {
        Ok(v) => patch.guardian_phone = v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    }

    match engine::update_student(store, &student_id, &patch) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Student),
        Action::Write,
    ) {
        return resp;
    }
    let student_id = match helpers::str_param(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::delete_student(store, &student_id) {
        Ok(enrollments_removed) => ok(
            &req.id,
            json!({ "enrollmentsRemoved": enrollments_removed }),
        ),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_students_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        Action::Write,
    ) {
        return resp;
    }
    let student_id = match helpers::str_param(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match helpers::str_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::enroll_student_in_class(store, &student_id, &class_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_students_transfer(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        Action::Write,
    ) {
        return resp;
    }
    let student_id = match helpers::str_param(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let new_class_id = match helpers::str_param(req, "newClassId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::transfer_student(store, &student_id, &new_class_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_students_unenroll(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        Action::Write,
    ) {
        return resp;
    }
    let student_id = match helpers::str_param(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match engine::unenroll_student_from_class(store, &student_id) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.enroll" => Some(handle_students_enroll(state, req)),
        "students.transfer" => Some(handle_students_transfer(state, req)),
        "students.unenroll" => Some(handle_students_unenroll(state, req)),
        _ => None,
    }
}

use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::ipc::error::{ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::{TeacherGroup, UserProfile};
use crate::repo;

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::TeacherGroup),
        Action::Write,
    ) {
        return resp;
    }
    let name = match helpers::str_param(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let group = TeacherGroup {
        id: Uuid::new_v4().to_string(),
        name,
        description: helpers::opt_str_param(req, "description"),
        created_at: String::new(),
        updated_at: String::new(),
    };
    match repo::create(&*store, group) {
        Ok(group) => ok(&req.id, json!({ "group": group })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::TeacherGroup),
        Action::Read,
    ) {
        return resp;
    }
    match repo::list(&*store, |_: &TeacherGroup| true) {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::TeacherGroup),
        Action::Write,
    ) {
        return resp;
    }
    let group_id = match helpers::str_param(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Clear references from profiles in the same unit, no dangling group ids.
    let result = store.run_transaction(|tx| {
        repo::get::<TeacherGroup>(tx, &group_id)?;
        for mut p in repo::list(tx, |p: &UserProfile| {
            p.teacher_group_id.as_deref() == Some(group_id.as_str())
        })? {
            p.teacher_group_id = None;
            repo::update(tx, p)?;
        }
        repo::delete::<TeacherGroup>(tx, &group_id)
    });
    match result {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        _ => None,
    }
}

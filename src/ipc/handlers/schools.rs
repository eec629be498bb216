use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::School;
use crate::repo;

fn admin_uids_param(req: &Request) -> Result<Option<Vec<String>>, serde_json::Value> {
    match req.params.get("adminUids") {
        None => Ok(None),
        Some(serde_json::Value::Array(items)) => {
            let mut uids = Vec::new();
            for item in items {
                match item.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                    Some(uid) => uids.push(uid.to_string()),
                    None => {
                        return Err(err(
                            &req.id,
                            "bad_params",
                            "adminUids must be non-empty strings",
                            None,
                        ))
                    }
                }
            }
            Ok(Some(uids))
        }
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            "adminUids must be an array",
            None,
        )),
    }
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::School),
        Action::Write,
    ) {
        return resp;
    }
    let name = match helpers::str_param(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let school_type = match helpers::str_param(req, "schoolType") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let admin_uids = match admin_uids_param(req) {
        Ok(v) => v.unwrap_or_default(),
        Err(resp) => return resp,
    };

    let school = School {
        id: Uuid::new_v4().to_string(),
        name,
        school_type,
        admin_uids,
        created_at: String::new(),
        updated_at: String::new(),
    };
    match repo::create(&*store, school) {
        Ok(school) => ok(&req.id, json!({ "school": school })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::School),
        Action::Read,
    ) {
        return resp;
    }
    match repo::list(&*store, |_: &School| true) {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_schools_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::School),
        Action::Write,
    ) {
        return resp;
    }
    let school_id = match helpers::str_param(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = helpers::opt_str_param(req, "name");
    let school_type = helpers::opt_str_param(req, "schoolType");
    let admin_uids = match admin_uids_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = (|| {
        let mut school = repo::get::<School>(&*store, &school_id)?;
        if let Some(name) = name {
            school.name = name;
        }
        if let Some(school_type) = school_type {
            school.school_type = school_type;
        }
        if let Some(admin_uids) = admin_uids {
            school.admin_uids = admin_uids;
        }
        repo::update(&*store, school)
    })();
    match result {
        Ok(school) => ok(&req.id, json!({ "school": school })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.create" => Some(handle_schools_create(state, req)),
        "schools.list" => Some(handle_schools_list(state, req)),
        "schools.update" => Some(handle_schools_update(state, req)),
        _ => None,
    }
}

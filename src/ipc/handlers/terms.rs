use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::AcademicTerm;
use crate::repo;

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Term),
        Action::Write,
    ) {
        return resp;
    }
    let name = match helpers::str_param(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let current = req
        .params
        .get("current")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let term = AcademicTerm {
        id: Uuid::new_v4().to_string(),
        name,
        start_date: helpers::opt_str_param(req, "startDate"),
        end_date: helpers::opt_str_param(req, "endDate"),
        current,
        created_at: String::new(),
        updated_at: String::new(),
    };
    let result = store.run_transaction(|tx| {
        // At most one current term.
        if current {
            for mut t in repo::list(tx, |t: &AcademicTerm| t.current)? {
                t.current = false;
                repo::update(tx, t)?;
            }
        }
        repo::create(tx, term.clone())
    });
    match result {
        Ok(term) => ok(&req.id, json!({ "term": term })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Term),
        Action::Read,
    ) {
        return resp;
    }
    match repo::list(&*store, |_: &AcademicTerm| true) {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_terms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Term),
        Action::Write,
    ) {
        return resp;
    }
    let term_id = match helpers::str_param(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch_value) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let name = match helpers::patch_str(patch_value, "name") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let start_date = match helpers::patch_opt_str(patch_value, "startDate") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let end_date = match helpers::patch_opt_str(patch_value, "endDate") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let current = patch_value.get("current").and_then(|v| v.as_bool());

    let result = store.run_transaction(|tx| {
        let mut term = repo::get::<AcademicTerm>(tx, &term_id)?;
        if let Some(name) = &name {
            term.name = name.clone();
        }
        if let Some(v) = &start_date {
            term.start_date = v.clone();
        }
        if let Some(v) = &end_date {
            term.end_date = v.clone();
        }
        if let Some(flag) = current {
            if flag {
                for mut t in repo::list(tx, |t: &AcademicTerm| t.current && t.id != term_id)? {
                    t.current = false;
                    repo::update(tx, t)?;
                }
            }
            term.current = flag;
        }
        repo::update(tx, term)
    });
    match result {
        Ok(term) => ok(&req.id, json!({ "term": term })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_terms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Term),
        Action::Write,
    ) {
        return resp;
    }
    let term_id = match helpers::str_param(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = (|| {
        repo::get::<AcademicTerm>(&*store, &term_id)?;
        repo::delete::<AcademicTerm>(&*store, &term_id)
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.create" => Some(handle_terms_create(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.update" => Some(handle_terms_update(state, req)),
        "terms.delete" => Some(handle_terms_delete(state, req)),
        _ => None,
    }
}

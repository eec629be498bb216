use serde_json::json;
use uuid::Uuid;

use crate::auth::{Action, Resource, ResourceKind};
use crate::ipc::error::{ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::Feedback;
use crate::repo;

fn handle_feedback_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Feedback),
        Action::Write,
    ) {
        return resp;
    }
    let message = match helpers::str_param(req, "message") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let feedback = Feedback {
        id: Uuid::new_v4().to_string(),
        author_uid: caller.uid.clone(),
        author_email: caller.email.clone(),
        message,
        topic: helpers::opt_str_param(req, "topic"),
        created_at: String::new(),
        updated_at: String::new(),
    };
    match repo::create(&*store, feedback) {
        Ok(feedback) => ok(&req.id, json!({ "feedback": feedback })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_feedback_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Feedback),
        Action::Read,
    ) {
        return resp;
    }
    match repo::list(&*store, |_: &Feedback| true) {
        Ok(feedback) => ok(&req.id, json!({ "feedback": feedback })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feedback.create" => Some(handle_feedback_create(state, req)),
        "feedback.list" => Some(handle_feedback_list(state, req)),
        _ => None,
    }
}

use serde_json::json;
use std::path::PathBuf;

use crate::auth::{Action, Resource, ResourceKind};
use crate::engine;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::{Settings, DEFAULT_PASS_MARK, SETTINGS_DOC_ID};
use crate::repo;
use crate::store::Store;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match Store::open(&path) {
        Ok(store) => {
            // Seed the settings document so the grading threshold is always
            // readable.
            if let Ok(None) = repo::find::<Settings>(&store, SETTINGS_DOC_ID) {
                let _ = repo::create(
                    &store,
                    Settings {
                        id: SETTINGS_DOC_ID.to_string(),
                        pass_mark: DEFAULT_PASS_MARK,
                        school_name: None,
                        created_at: String::new(),
                        updated_at: String::new(),
                    },
                );
            }
            state.workspace = Some(path.clone());
            state.store = Some(store);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "store_open_failed", format!("{e:?}"), None),
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Settings),
        Action::Read,
    ) {
        return resp;
    }
    match repo::find::<Settings>(&*store, SETTINGS_DOC_ID) {
        Ok(Some(settings)) => ok(&req.id, json!({ "settings": settings })),
        Ok(None) => ok(
            &req.id,
            json!({ "settings": { "id": SETTINGS_DOC_ID, "passMark": DEFAULT_PASS_MARK } }),
        ),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Settings),
        Action::Write,
    ) {
        return resp;
    }

    let pass_mark = req.params.get("passMark").and_then(|v| v.as_f64());
    let school_name = helpers::opt_str_param(req, "schoolName");

    let result = (|| {
        let mut settings = repo::find::<Settings>(&*store, SETTINGS_DOC_ID)?.unwrap_or(Settings {
            id: SETTINGS_DOC_ID.to_string(),
            pass_mark: DEFAULT_PASS_MARK,
            school_name: None,
            created_at: String::new(),
            updated_at: String::new(),
        });
        let fresh = settings.created_at.is_empty();
        if let Some(p) = pass_mark {
            settings.pass_mark = p;
        }
        if school_name.is_some() {
            settings.school_name = school_name.clone();
        }
        if fresh {
            repo::create(&*store, settings)
        } else {
            repo::update(&*store, settings)
        }
    })();

    match result {
        Ok(settings) => ok(&req.id, json!({ "settings": settings })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_heal(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let caller = match helpers::caller_of(store, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    // System maintenance is gated like a settings write: admin only.
    if let Err(resp) = helpers::gate(
        req,
        &caller,
        &Resource::of(ResourceKind::Settings),
        Action::Write,
    ) {
        return resp;
    }
    match engine::heal(store) {
        Ok(report) => ok(&req.id, json!({ "report": report })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        "maintenance.heal" => Some(handle_heal(state, req)),
        _ => None,
    }
}

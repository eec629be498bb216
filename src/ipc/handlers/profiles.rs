use serde_json::json;

use crate::auth::{Action, Resource, ResourceKind};
use crate::engine;
use crate::errors::OpError;
use crate::ipc::error::{err, ok, op_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, School, TeacherGroup, UserProfile};
use crate::repo;
use crate::store::Store;

/// First-authentication hook: creates the profile in the pending role, or
/// refreshes email/display name on an existing one. No gate; an identity
/// has to be able to register itself before it has any role.
fn handle_profiles_ensure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let uid = match req
        .params
        .get("caller")
        .and_then(|c| c.get("uid"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing caller.uid", None),
    };
    let email = match req
        .params
        .get("caller")
        .and_then(|c| c.get("email"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing caller.email", None),
    };
    let display_name = helpers::opt_str_param(req, "displayName");

    let existing = match repo::find::<UserProfile>(&*store, &uid) {
        Ok(v) => v,
        Err(e) => return op_err(&req.id, &e),
    };

    match existing {
        Some(mut profile) => {
            let name_changed = display_name.is_some() && profile.display_name != display_name;
            if profile.email != email || name_changed {
                profile.email = email;
                if let Some(name) = display_name {
                    profile.display_name = Some(name);
                }
                profile = match repo::update(&*store, profile) {
                    Ok(p) => p,
                    Err(e) => return op_err(&req.id, &e),
                };
                if name_changed {
                    if let Err(e) = engine::propagate_teacher_name(store, &uid) {
                        return op_err(&req.id, &e);
                    }
                }
            }
            ok(&req.id, json!({ "profile": profile, "created": false }))
        }
        None => {
            // Everyone starts pending until an admin promotes them. Two
            // bootstrap exceptions so a fresh workspace is administrable at
            // all: the very first profile, and uids listed in a school
            // document's adminUids.
            let role = match initial_role(&*store, &uid) {
                Ok(r) => r,
                Err(e) => return op_err(&req.id, &e),
            };
            let profile = UserProfile {
                id: uid,
                email,
                display_name,
                role,
                teacher_group_id: None,
                assigned_course_names: Vec::new(),
                school_id: None,
                created_at: String::new(),
                updated_at: String::new(),
            };
            match repo::create(&*store, profile) {
                Ok(profile) => ok(&req.id, json!({ "profile": profile, "created": true })),
                Err(e) => op_err(&req.id, &e),
            }
        }
    }
}

fn initial_role(db: &Store, uid: &str) -> Result<Role, OpError> {
    if repo::list(db, |_: &UserProfile| true)?.is_empty() {
        return Ok(Role::Admin);
    }
    let claimed = !repo::list(db, |s: &School| s.admin_uids.iter().any(|u| u == uid))?.is_empty();
    Ok(if claimed { Role::Admin } else { Role::Pending })
}

/// Own profile, readable regardless of role so the UI can show a pending
/// account its state.
fn handle_profiles_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match helpers::store_of(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let caller = match helpers::caller_of(store, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match repo::get::<UserProfile>(&*store, &caller.uid) {
        Ok(profile) => ok(&req.id, json!({ "profile": profile })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_profiles_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Profile),
        Action::Read,
    ) {
        return resp;
    }
    let role_filter = helpers::opt_str_param(req, "role");
    match repo::list(&*store, |p: &UserProfile| match &role_filter {
        Some(r) => p.role.as_str() == r,
        None => true,
    }) {
        Ok(profiles) => ok(&req.id, json!({ "profiles": profiles })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_profiles_set_role(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Profile),
        Action::Write,
    ) {
        return resp;
    }
    let uid = match helpers::str_param(req, "uid") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = match helpers::str_param(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(role) = Role::parse(&role) else {
        return err(&req.id, "bad_params", "unknown role", None);
    };

    let result = (|| {
        let mut profile = repo::get::<UserProfile>(&*store, &uid)?;
        profile.role = role;
        repo::update(&*store, profile)
    })();
    match result {
        Ok(profile) => ok(&req.id, json!({ "profile": profile })),
        Err(e) => op_err(&req.id, &e),
    }
}

fn handle_profiles_set_teacher_group(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &Resource::of(ResourceKind::Profile),
        Action::Write,
    ) {
        return resp;
    }
    let uid = match helpers::str_param(req, "uid") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let group_id = helpers::opt_str_param(req, "groupId");

    let result = (|| {
        if let Some(group_id) = &group_id {
            repo::get::<TeacherGroup>(&*store, group_id)?;
        }
        let mut profile = repo::get::<UserProfile>(&*store, &uid)?;
        profile.teacher_group_id = group_id.clone();
        repo::update(&*store, profile)
    })();
    match result {
        Ok(profile) => ok(&req.id, json!({ "profile": profile })),
        Err(e) => op_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profiles.ensure" => Some(handle_profiles_ensure(state, req)),
        "profiles.whoami" => Some(handle_profiles_whoami(state, req)),
        "profiles.list" => Some(handle_profiles_list(state, req)),
        "profiles.setRole" => Some(handle_profiles_set_role(state, req)),
        "profiles.setTeacherGroup" => Some(handle_profiles_set_teacher_group(state, req)),
        _ => None,
    }
}

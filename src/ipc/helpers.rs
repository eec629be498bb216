use crate::auth::{self, Action, Caller, Resource};
use crate::errors::OpError;
use crate::ipc::error::{err, op_err};
use crate::ipc::types::{AppState, Request};
use crate::model::{Settings, DEFAULT_PASS_MARK, SETTINGS_DOC_ID};
use crate::repo;
use crate::store::Store;

// Param/caller helpers return the ready error response in Err so handlers can
// bail with a plain `return resp`.

pub fn store_of<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Store, serde_json::Value> {
    state
        .store
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn str_param(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing {}", key),
            None,
        )),
    }
}

pub fn opt_str_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn caller_of(store: &Store, req: &Request) -> Result<Caller, serde_json::Value> {
    auth::resolve_caller(store, &req.params).map_err(|e| op_err(&req.id, &e))
}

pub fn gate(
    req: &Request,
    caller: &Caller,
    resource: &Resource,
    action: Action,
) -> Result<(), serde_json::Value> {
    auth::require(caller, resource, action).map_err(|e| op_err(&req.id, &e))
}

/// The injected grading threshold; falls back to the default when the
/// settings document has not been written yet.
pub fn pass_mark(store: &Store) -> Result<f64, OpError> {
    Ok(repo::find::<Settings>(store, SETTINGS_DOC_ID)?
        .map(|s| s.pass_mark)
        .unwrap_or(DEFAULT_PASS_MARK))
}

/// Patch field for a required string: absent = leave alone, present = must be
/// a non-empty string.
pub fn patch_str(
    patch: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, String> {
    match patch.get(key) {
        None => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Err(format!("{} must not be empty", key))
            } else {
                Ok(Some(t.to_string()))
            }
        }
        Some(_) => Err(format!("{} must be a string", key)),
    }
}

/// Patch field for an optional string: absent = leave alone, null or "" =
/// clear, string = set.
pub fn patch_opt_str(
    patch: &serde_json::Value,
    key: &str,
) -> Result<Option<Option<String>>, String> {
    match patch.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(None)),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(Some(if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }))
        }
        Some(_) => Err(format!("{} must be a string or null", key)),
    }
}

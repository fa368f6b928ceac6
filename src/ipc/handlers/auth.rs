use serde_json::{json, Value};

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::path;
use crate::store::Store;

const MIN_PASSWORD_LEN: usize = 6;

fn register(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let email = get_required_str(params, "email")?.trim().to_string();
    let password = get_required_str(params, "password")?;
    let username = get_required_str(params, "username")?.trim().to_string();

    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email must contain @"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::bad_params(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if username.is_empty() {
        return Err(HandlerErr::bad_params("username must not be empty"));
    }

    let user_id = store
        .user_create(&email, &password)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("duplicate_email", "email is already registered"))?;

    let profile = json!({
        "username": username,
        "email": email.to_ascii_lowercase(),
        "gender": get_opt_str(params, "gender"),
        "phoneNumber": get_opt_str(params, "phoneNumber"),
        "photoPath": Value::Null,
    });
    store
        .create_with_id(path::USER_PROFILES, &user_id, &profile)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "userId": user_id }))
}

fn login(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let user_id = store
        .user_authenticate(&email, &password)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("invalid_credentials", "wrong email or password"))?;
    Ok(json!({ "userId": user_id }))
}

fn get_profile(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let doc = store
        .get(path::USER_PROFILES, &user_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "profile not found"))?;
    Ok(json!({ "profile": doc.to_json() }))
}

fn update_profile(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let raw_patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch object"))?;

    let current = store
        .get(path::USER_PROFILES, &user_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "profile not found"))?;

    let mut patch = serde_json::Map::new();
    for key in ["username", "gender", "phoneNumber", "photoPath"] {
        if let Some(v) = raw_patch.get(key) {
            patch.insert(key.to_string(), v.clone());
        }
    }
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    if let Some(username) = patch.get("username").and_then(|v| v.as_str()) {
        if username.trim().is_empty() {
            return Err(HandlerErr::bad_params("username must not be empty"));
        }
    }

    // A new photo must exist in the blob store before the profile points at
    // it; the replaced photo is removed afterwards, best effort.
    let old_photo = current
        .fields
        .get("photoPath")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let new_photo = patch.get("photoPath").cloned();
    if let Some(new_photo) = &new_photo {
        if let Some(p) = new_photo.as_str() {
            let present = store
                .blob_exists(p)
                .map_err(|e| HandlerErr::new("blob_query_failed", e.to_string()))?;
            if !present {
                return Err(HandlerErr::bad_params(format!(
                    "photoPath references unknown blob: {}",
                    p
                )));
            }
        }
    }

    store
        .update_merge(path::USER_PROFILES, &user_id, &Value::Object(patch))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let mut warnings: Vec<String> = Vec::new();
    if let (Some(old), Some(new)) = (&old_photo, &new_photo) {
        if new.as_str() != Some(old.as_str()) {
            if let Err(e) = store.blob_delete(old) {
                warnings.push(format!("failed to delete old photo {}: {}", old, e));
            }
        }
    }

    Ok(json!({ "ok": true, "warnings": warnings }))
}

fn with_store<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&mut Store, &Value) -> Result<Value, HandlerErr>,
{
    let Some(store) = state.store.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(store, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(with_store(state, req, register)),
        "auth.login" => Some(with_store(state, req, login)),
        "users.getProfile" => Some(with_store(state, req, |s, p| get_profile(s, p))),
        "users.updateProfile" => Some(with_store(state, req, update_profile)),
        _ => None,
    }
}

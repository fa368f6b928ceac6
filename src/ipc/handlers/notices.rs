use chrono::Utc;
use serde_json::{json, Value};

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::path::notice_board_key;
use crate::store::Store;

fn board_key(params: &Value) -> Result<String, HandlerErr> {
    let board = get_required_str(params, "board")?;
    notice_board_key(&board).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let key = board_key(params)?;
    let docs = store
        .list(&key)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "notices": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    }))
}

fn create(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let key = board_key(params)?;
    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    let fields = json!({
        "title": title,
        "body": get_opt_str(params, "body"),
        "link": get_opt_str(params, "link"),
        "createdBy": get_opt_str(params, "createdBy"),
        "postedAt": Utc::now().to_rfc3339(),
    });
    let id = store
        .insert(&key, &fields)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "noticeId": id }))
}

fn update(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let key = board_key(params)?;
    let notice_id = get_required_str(params, "noticeId")?;
    let raw_patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch object"))?;

    let mut patch = serde_json::Map::new();
    for field in ["title", "body", "link"] {
        if let Some(v) = raw_patch.get(field) {
            patch.insert(field.to_string(), v.clone());
        }
    }
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    if let Some(title) = patch.get("title") {
        if title.as_str().map(|s| s.trim().is_empty()).unwrap_or(true) {
            return Err(HandlerErr::bad_params("title must be a non-empty string"));
        }
    }

    let updated = store
        .update_merge(&key, &notice_id, &Value::Object(patch))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if !updated {
        return Err(HandlerErr::new("not_found", "notice not found"));
    }
    Ok(json!({ "ok": true }))
}

fn delete(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let key = board_key(params)?;
    let notice_id = get_required_str(params, "noticeId")?;
    let deleted = store
        .delete_doc(&key, &notice_id)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if !deleted {
        return Err(HandlerErr::new("not_found", "notice not found"));
    }
    Ok(json!({ "ok": true }))
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
        "notices.list" => Some(with_store(state, req, |s, p| list(s, p))),
        "notices.create" => Some(with_store(state, req, create)),
        "notices.update" => Some(with_store(state, req, update)),
        "notices.delete" => Some(with_store(state, req, delete)),
        _ => None,
    }
}

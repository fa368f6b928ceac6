use serde_json::{json, Value};
use std::path::PathBuf;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::store::Store;

/// Storage folders the shell may upload into; one per media kind.
const FOLDERS: &[&str] = &["unit-images", "unit-pdfs", "profile-photos"];

fn upload(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let source = PathBuf::from(get_required_str(params, "sourcePath")?);
    let folder = get_required_str(params, "folder")?;
    if !FOLDERS.contains(&folder.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "unknown media folder: {}",
            folder
        )));
    }
    if !source.is_file() {
        return Err(HandlerErr::bad_params(format!(
            "source file not found: {}",
            source.to_string_lossy()
        )));
    }
    let info = store
        .blob_put(&source, &folder)
        .map_err(|e| HandlerErr::new("blob_upload_failed", e.to_string()))?;
    Ok(info.to_json())
}

fn info(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let storage_path = get_required_str(params, "storagePath")?;
    let info = store
        .blob_info(&storage_path)
        .map_err(|e| HandlerErr::new("blob_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "blob not found"))?;
    Ok(info.to_json())
}

fn delete(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let storage_path = get_required_str(params, "storagePath")?;
    let deleted = store
        .blob_delete(&storage_path)
        .map_err(|e| HandlerErr::new("blob_delete_failed", e.to_string()))?;
    Ok(json!({ "deleted": deleted }))
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
        "media.upload" => Some(with_store(state, req, upload)),
        "media.info" => Some(with_store(state, req, |s, p| info(s, p))),
        "media.delete" => Some(with_store(state, req, delete)),
        _ => None,
    }
}

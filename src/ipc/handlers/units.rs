use serde_json::{json, Value};

use crate::cascade;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{collection_param, get_required_str, node_param};
use crate::ipc::types::{AppState, Request};
use crate::path::Level;
use crate::store::{InsertOutcome, Store};

const BLOB_FIELDS: &[&str] = &["unitImagePath", "unitPdfPath"];

fn require_blob(store: &Store, storage_path: &str) -> Result<(), HandlerErr> {
    let present = store
        .blob_exists(storage_path)
        .map_err(|e| HandlerErr::new("blob_query_failed", e.to_string()))?;
    if !present {
        return Err(HandlerErr::bad_params(format!(
            "references unknown blob: {}",
            storage_path
        )));
    }
    Ok(())
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let collection = collection_param(params)?;
    if collection.level() != Level::Unit {
        return Err(HandlerErr::bad_params(
            "path does not address a unit collection",
        ));
    }
    let docs = store
        .list(&collection.storage_key())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "units": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    }))
}

fn create(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let collection = collection_param(params)?;
    if collection.level() != Level::Unit {
        return Err(HandlerErr::bad_params(
            "path does not address a unit collection",
        ));
    }
    let unit_name = get_required_str(params, "unitName")?.trim().to_string();
    if unit_name.is_empty() {
        return Err(HandlerErr::bad_params("unitName must not be empty"));
    }
    let unit_number = params.get("unitNumber").and_then(|v| v.as_i64());

    let mut fields = serde_json::Map::new();
    fields.insert("unitName".to_string(), json!(unit_name));
    fields.insert("unitNumber".to_string(), json!(unit_number));
    for key in BLOB_FIELDS {
        match params.get(*key).and_then(|v| v.as_str()) {
            Some(p) => {
                require_blob(store, p)?;
                fields.insert((*key).to_string(), json!(p));
            }
            None => {
                fields.insert((*key).to_string(), Value::Null);
            }
        }
    }

    let outcome = store
        .insert_unique(
            &collection.storage_key(),
            "unitName",
            &Value::Object(fields),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    match outcome {
        InsertOutcome::Inserted(id) => Ok(json!({ "unitId": id, "unitName": unit_name })),
        InsertOutcome::Duplicate => Err(HandlerErr::new(
            "duplicate_name",
            format!("a unit named '{}' already exists here", unit_name),
        )),
    }
}

fn update(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Unit {
        return Err(HandlerErr::bad_params("path does not address a unit"));
    }
    let raw_patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch object"))?;

    let collection = node.collection().storage_key();
    let current = store
        .get(&collection, node.doc_id())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "unit not found"))?;

    let mut patch = serde_json::Map::new();
    if let Some(name) = raw_patch.get("unitName") {
        let name = name
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("unitName must be a non-empty string"))?;
        let taken = store
            .exists_other(&collection, node.doc_id(), "unitName", &name)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        if taken {
            return Err(HandlerErr::new(
                "duplicate_name",
                format!("a unit named '{}' already exists here", name),
            ));
        }
        patch.insert("unitName".to_string(), json!(name));
    }
    if let Some(number) = raw_patch.get("unitNumber") {
        patch.insert("unitNumber".to_string(), number.clone());
    }

    // Blob swaps: the incoming reference must exist before it is recorded;
    // the replaced blob is removed after the write, best effort.
    let mut replaced: Vec<String> = Vec::new();
    for key in BLOB_FIELDS {
        let Some(incoming) = raw_patch.get(*key) else {
            continue;
        };
        if let Some(p) = incoming.as_str() {
            require_blob(store, p)?;
        } else if !incoming.is_null() {
            return Err(HandlerErr::bad_params(format!(
                "{} must be a storage path or null",
                key
            )));
        }
        let old = current.fields.get(*key).and_then(|v| v.as_str());
        if let Some(old) = old {
            if incoming.as_str() != Some(old) {
                replaced.push(old.to_string());
            }
        }
        patch.insert((*key).to_string(), incoming.clone());
    }

    if patch.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }

    store
        .update_merge(&collection, node.doc_id(), &Value::Object(patch))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let mut warnings: Vec<String> = Vec::new();
    for old in replaced {
        if let Err(e) = store.blob_delete(&old) {
            warnings.push(format!("failed to delete replaced blob {}: {}", old, e));
        }
    }

    Ok(json!({ "ok": true, "warnings": warnings }))
}

fn delete(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Unit {
        return Err(HandlerErr::bad_params("path does not address a unit"));
    }
    let exists = store
        .get(&node.collection().storage_key(), node.doc_id())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "unit not found"));
    }

    let report = cascade::delete_node(store, &node)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if report.errors.is_empty() {
        Ok(report.to_json())
    } else {
        Err(
            HandlerErr::new("cascade_partial", report.errors[0].clone())
                .with_details(report.to_json()),
        )
    }
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
        "units.list" => Some(with_store(state, req, |s, p| list(s, p))),
        "units.create" => Some(with_store(state, req, create)),
        "units.update" => Some(with_store(state, req, update)),
        "units.delete" => Some(with_store(state, req, delete)),
        _ => None,
    }
}

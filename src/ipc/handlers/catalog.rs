use serde_json::{json, Value};

use crate::cascade;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{collection_param, get_required_str, node_param};
use crate::ipc::types::{AppState, Request};
use crate::path::{Level, Track};
use crate::store::{InsertOutcome, RenameOutcome, Store};

/// Levels the generic catalog handler owns. Units and quizzes carry extra
/// fields (blobs, questions) and have their own handler families.
fn is_container(level: Level) -> bool {
    !matches!(level, Level::Unit | Level::Quiz)
}

fn tracks(_params: &Value) -> Result<Value, HandlerErr> {
    let tracks: Vec<Value> = Track::all()
        .iter()
        .map(|t| {
            json!({
                "track": t.key(),
                "levels": t
                    .levels()
                    .iter()
                    .map(|l| {
                        json!({
                            "level": l.key(),
                            "collection": l.collection(),
                            "nameField": l.name_field(),
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(json!({ "tracks": tracks }))
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let collection = collection_param(params)?;
    let docs = store
        .list(&collection.storage_key())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "level": collection.level().key(),
        "docs": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    }))
}

fn create(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let collection = collection_param(params)?;
    let level = collection.level();
    if !is_container(level) {
        return Err(HandlerErr::bad_params(format!(
            "use the dedicated handlers to create a {}",
            level.key()
        )));
    }
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let mut fields = serde_json::Map::new();
    fields.insert(level.name_field().to_string(), json!(name));
    let outcome = store
        .insert_unique(
            &collection.storage_key(),
            level.name_field(),
            &Value::Object(fields),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    match outcome {
        InsertOutcome::Inserted(id) => Ok(json!({
            "id": id,
            "level": level.key(),
            "name": name,
        })),
        InsertOutcome::Duplicate => Err(HandlerErr::new(
            "duplicate_name",
            format!("a {} named '{}' already exists here", level.key(), name),
        )),
    }
}

fn rename(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    let level = node.level();
    if !is_container(level) {
        return Err(HandlerErr::bad_params(format!(
            "use the dedicated handlers to edit a {}",
            level.key()
        )));
    }
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let outcome = store
        .rename_unique(
            &node.collection().storage_key(),
            node.doc_id(),
            level.name_field(),
            &name,
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    match outcome {
        RenameOutcome::Renamed => Ok(json!({ "ok": true })),
        RenameOutcome::Duplicate => Err(HandlerErr::new(
            "duplicate_name",
            format!("a {} named '{}' already exists here", level.key(), name),
        )),
        RenameOutcome::NotFound => Err(HandlerErr::new(
            "not_found",
            format!("{} not found", level.key()),
        )),
    }
}

fn delete(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    let exists = store
        .get(&node.collection().storage_key(), node.doc_id())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if !exists {
        return Err(HandlerErr::new(
            "not_found",
            format!("{} not found", node.level().key()),
        ));
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

fn pending_deletes(store: &Store, _params: &Value) -> Result<Value, HandlerErr> {
    let pending = cascade::pending(store)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "pending": pending
            .iter()
            .map(|(id, n)| json!({ "cascadeId": id, "remaining": n }))
            .collect::<Vec<_>>(),
    }))
}

fn resume_deletes(store: &mut Store, _params: &Value) -> Result<Value, HandlerErr> {
    let reports = cascade::resume_all(store)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    Ok(json!({
        "reports": reports.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
    }))
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
        "catalog.tracks" => Some(match tracks(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }),
        "catalog.list" => Some(with_store(state, req, |s, p| list(s, p))),
        "catalog.create" => Some(with_store(state, req, create)),
        "catalog.rename" => Some(with_store(state, req, rename)),
        "catalog.delete" => Some(with_store(state, req, delete)),
        "catalog.pendingDeletes" => Some(with_store(state, req, |s, p| pending_deletes(s, p))),
        "catalog.resumeDeletes" => Some(with_store(state, req, resume_deletes)),
        _ => None,
    }
}

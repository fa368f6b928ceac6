use chrono::Utc;
use serde_json::{json, Value};

use crate::cascade;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{collection_param, get_required_str, node_param};
use crate::ipc::types::{AppState, Request};
use crate::path::Level;
use crate::quiz;
use crate::store::Store;

fn parse_questions(raw: &Value) -> Result<Vec<quiz::Question>, HandlerErr> {
    let questions: Vec<quiz::Question> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid questions: {}", e)))?;
    quiz::validate_questions(&questions).map_err(HandlerErr::bad_params)?;
    Ok(questions)
}

fn list(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let collection = collection_param(params)?;
    if collection.level() != Level::Quiz {
        return Err(HandlerErr::bad_params(
            "path does not address a quiz collection",
        ));
    }
    let docs = store
        .list(&collection.storage_key())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "quizzes": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    }))
}

fn get(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Quiz {
        return Err(HandlerErr::bad_params("path does not address a quiz"));
    }
    let doc = store
        .get(&node.collection().storage_key(), node.doc_id())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "quiz not found"))?;
    Ok(json!({ "quiz": doc.to_json() }))
}

fn create(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let collection = collection_param(params)?;
    if collection.level() != Level::Quiz {
        return Err(HandlerErr::bad_params(
            "path does not address a quiz collection",
        ));
    }
    let quiz_number = get_required_str(params, "quizNumber")?.trim().to_string();
    if quiz_number.is_empty() {
        return Err(HandlerErr::bad_params("quizNumber must not be empty"));
    }
    let quiz_title = get_required_str(params, "quizTitle")?.trim().to_string();
    if quiz_title.is_empty() {
        return Err(HandlerErr::bad_params("quizTitle must not be empty"));
    }
    let created_by = get_required_str(params, "createdBy")?;
    let questions = parse_questions(
        params
            .get("questions")
            .ok_or_else(|| HandlerErr::bad_params("missing questions"))?,
    )?;

    let fields = json!({
        "quizTitle": quiz_title,
        "questions": questions,
        "createdBy": created_by,
        "createdAt": Utc::now().to_rfc3339(),
    });
    // The quiz number is the document id. A taken number is refused outright;
    // an id-keyed write that silently replaced an existing quiz would destroy
    // another author's work.
    let created = store
        .create_with_id(&collection.storage_key(), &quiz_number, &fields)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    if !created {
        return Err(HandlerErr::new(
            "duplicate_id",
            format!("quiz number '{}' is already taken here", quiz_number),
        ));
    }
    Ok(json!({ "quizId": quiz_number, "quizTitle": quiz_title }))
}

fn update(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Quiz {
        return Err(HandlerErr::bad_params("path does not address a quiz"));
    }
    let raw_patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch object"))?;

    let mut patch = serde_json::Map::new();
    if let Some(title) = raw_patch.get("quizTitle") {
        let title = title
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("quizTitle must be a non-empty string"))?;
        patch.insert("quizTitle".to_string(), json!(title));
    }
    if let Some(questions) = raw_patch.get("questions") {
        let questions = parse_questions(questions)?;
        patch.insert("questions".to_string(), json!(questions));
    }
    if patch.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }

    let updated = store
        .update_merge(
            &node.collection().storage_key(),
            node.doc_id(),
            &Value::Object(patch),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if !updated {
        return Err(HandlerErr::new("not_found", "quiz not found"));
    }
    Ok(json!({ "ok": true }))
}

fn delete(store: &mut Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Quiz {
        return Err(HandlerErr::bad_params("path does not address a quiz"));
    }
    let exists = store
        .get(&node.collection().storage_key(), node.doc_id())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "quiz not found"));
    }

    // Takes the quiz's responses sub-collection with it.
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
        "quizzes.list" => Some(with_store(state, req, |s, p| list(s, p))),
        "quizzes.get" => Some(with_store(state, req, |s, p| get(s, p))),
        "quizzes.create" => Some(with_store(state, req, create)),
        "quizzes.update" => Some(with_store(state, req, update)),
        "quizzes.delete" => Some(with_store(state, req, delete)),
        _ => None,
    }
}

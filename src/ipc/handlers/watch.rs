use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{collection_param, get_required_str};
use crate::ipc::types::{AppState, Request, Watch};
use crate::path::notice_board_key;

/// Resolves the watched collection from either a notice board or a typed
/// catalog path.
fn target_collection(params: &serde_json::Value) -> Result<String, HandlerErr> {
    if let Some(board) = params.get("board").and_then(|v| v.as_str()) {
        return notice_board_key(board).map_err(|e| HandlerErr::bad_params(e.to_string()));
    }
    Ok(collection_param(params)?.storage_key())
}

fn handle_subscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.store.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    let collection = match target_collection(&req.params) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let id = Uuid::new_v4().to_string();
    state.watches.push(Watch {
        id: id.clone(),
        collection: collection.clone(),
    });
    ok(
        &req.id,
        json!({ "subscriptionId": id, "collection": collection }),
    )
}

fn handle_unsubscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sub_id = match get_required_str(&req.params, "subscriptionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let before = state.watches.len();
    state.watches.retain(|w| w.id != sub_id);
    if state.watches.len() == before {
        return err(&req.id, "not_found", "unknown subscription", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "watch.subscribe" => Some(handle_subscribe(state, req)),
        "watch.unsubscribe" => Some(handle_unsubscribe(state, req)),
        _ => None,
    }
}

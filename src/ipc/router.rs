use serde_json::json;

use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::catalog::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::units::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::media::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::quizzes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::sessions::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::notices::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::watch::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Snapshot events for collections the last request mutated, one per live
/// subscription on an affected collection. The full collection contents are
/// sent every time; consumers replace their list wholesale, so whichever
/// event arrives last wins.
pub fn drain_events(state: &mut AppState) -> Vec<serde_json::Value> {
    let Some(store) = state.store.as_mut() else {
        return Vec::new();
    };
    let touched = store.take_touched();
    if touched.is_empty() {
        return Vec::new();
    }

    let mut events = Vec::new();
    for watch in &state.watches {
        if !touched.iter().any(|c| c == &watch.collection) {
            continue;
        }
        let Ok(docs) = store.list(&watch.collection) else {
            continue;
        };
        events.push(json!({
            "event": "snapshot",
            "subscriptionId": watch.id,
            "collection": watch.collection,
            "docs": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
        }));
    }
    events
}

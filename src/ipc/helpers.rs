use serde_json::Value;

use crate::ipc::error::HandlerErr;
use crate::path::{CollectionRef, NodePath, Track};

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_str_list(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Ok(Vec::new());
    };
    let arr = raw
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array of ids", key)))?;
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array of ids", key)))
        })
        .collect()
}

pub fn track_param(params: &Value) -> Result<Track, HandlerErr> {
    let key = get_required_str(params, "track")?;
    Track::from_key(&key)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown track: {}", key)))
}

/// `{ track, parents: [ids...] }` → the addressed child collection.
pub fn collection_param(params: &Value) -> Result<CollectionRef, HandlerErr> {
    let track = track_param(params)?;
    let parents = get_str_list(params, "parents")?;
    CollectionRef::new(track, parents).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// `{ track, ids: [ids...] }` → the addressed document.
pub fn node_param(params: &Value) -> Result<NodePath, HandlerErr> {
    let track = track_param(params)?;
    let ids = get_str_list(params, "ids")?;
    NodePath::new(track, ids).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

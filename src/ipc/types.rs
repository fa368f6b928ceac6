use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::quiz;
use crate::store::Store;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A quiz run in flight plus whether its result has reached the store.
/// Scoring and persistence are decoupled: a submitted session whose write
/// failed keeps its score and stays eligible for a persistence retry.
pub struct ActiveSession {
    pub session: quiz::Session,
    pub persisted: bool,
}

/// One live collection subscription; events are emitted until the client
/// unsubscribes or the process exits.
pub struct Watch {
    pub id: String,
    pub collection: String,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    pub sessions: HashMap<String, ActiveSession>,
    pub watches: Vec<Watch>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            store: None,
            sessions: HashMap::new(),
            watches: Vec::new(),
        }
    }
}

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_i64, get_required_str, node_param};
use crate::ipc::types::{ActiveSession, AppState, Request};
use crate::path::{self, Level};
use crate::quiz::{self, Phase, SubmitOutcome};
use crate::store::Store;

fn start(
    store: &mut Store,
    sessions: &mut std::collections::HashMap<String, ActiveSession>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Quiz {
        return Err(HandlerErr::bad_params("path does not address a quiz"));
    }
    let user_id = get_required_str(params, "userId")?;
    let duration_secs = get_required_i64(params, "durationSecs")?;
    if duration_secs < 0 {
        return Err(HandlerErr::bad_params("durationSecs must not be negative"));
    }

    let doc = store
        .get(&node.collection().storage_key(), node.doc_id())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "quiz not found"))?;
    let questions: Vec<quiz::Question> = serde_json::from_value(
        doc.fields.get("questions").cloned().unwrap_or(Value::Null),
    )
    .map_err(|e| HandlerErr::new("db_query_failed", format!("stored quiz is invalid: {}", e)))?;

    let responses_collection = node
        .responses_key()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    // One attempt per user per quiz.
    let attempted = store
        .exists(&responses_collection, "userId", &user_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if attempted {
        return Err(HandlerErr::new(
            "already_attempted",
            "this user has already taken this quiz",
        ));
    }

    let now = Utc::now();
    let session = quiz::Session::new(
        user_id,
        node.doc_id().to_string(),
        responses_collection,
        questions,
        duration_secs,
        now,
    );
    let session_id = Uuid::new_v4().to_string();
    let result = json!({
        "sessionId": session_id,
        "quizTitle": doc.fields.get("quizTitle").cloned().unwrap_or(Value::Null),
        "totalQuestions": session.questions().len(),
        "remainingSecs": session.remaining_secs(now),
    });
    sessions.insert(session_id, ActiveSession {
        session,
        persisted: false,
    });
    Ok(result)
}

/// Writes the response document and the response-sheet append. Scoring has
/// already happened by the time this runs; a failed write leaves the session
/// submitted and unpersisted, and the score travels back in the error so the
/// user still sees their result.
fn persist(
    store: &mut Store,
    entry: &mut ActiveSession,
    score: quiz::Score,
) -> Result<Option<String>, HandlerErr> {
    if entry.persisted {
        return Ok(None);
    }
    let fields = entry.session.response_fields(&score, Utc::now());
    match store.record_quiz_response(
        &entry.session.responses_collection,
        &entry.session.user_id,
        &fields,
    ) {
        Ok(response_id) => {
            entry.persisted = true;
            Ok(Some(response_id))
        }
        Err(e) => Err(HandlerErr::new("persist_failed", e.to_string())
            .with_details(json!({ "score": score }))),
    }
}

fn submitted_result(score: quiz::Score, response_id: Option<String>) -> Value {
    json!({
        "phase": Phase::Submitted.key(),
        "score": score,
        "responseId": response_id,
    })
}

fn status(
    store: &mut Store,
    entry: &mut ActiveSession,
    _params: &Value,
) -> Result<Value, HandlerErr> {
    let now = Utc::now();
    let expired_score = entry.session.tick(now);
    if let Some(score) = expired_score {
        // Expiry may have submitted the session on this very call; the
        // result must be durable before the client sees "submitted".
        let response_id = persist(store, entry, score)?;
        let mut result = submitted_result(score, response_id);
        result["remainingSecs"] = json!(0);
        return Ok(result);
    }
    let answered = entry
        .session
        .selected()
        .iter()
        .filter(|s| s.is_some())
        .count();
    Ok(json!({
        "phase": entry.session.phase().key(),
        "remainingSecs": entry.session.remaining_secs(now),
        "totalQuestions": entry.session.questions().len(),
        "answeredCount": answered,
        "unanswered": entry.session.unanswered(),
    }))
}

fn answer(
    store: &mut Store,
    entry: &mut ActiveSession,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let index = get_required_i64(params, "questionIndex")?;
    if index < 0 {
        return Err(HandlerErr::bad_params("questionIndex must not be negative"));
    }
    let option = get_required_str(params, "option")?;
    let now = Utc::now();
    match entry.session.select_answer(index as usize, &option, now) {
        Ok(()) => Ok(json!({
            "ok": true,
            "remainingSecs": entry.session.remaining_secs(now),
        })),
        Err(e) => {
            // The deadline may have hit between answers; persist if so.
            if let Some(score) = entry.session.score().copied() {
                let response_id = persist(store, entry, score)?;
                return Err(HandlerErr::new("bad_state", e.message())
                    .with_details(submitted_result(score, response_id)));
            }
            Err(HandlerErr::new("bad_state", e.message()))
        }
    }
}

fn submit(
    store: &mut Store,
    entry: &mut ActiveSession,
    _params: &Value,
) -> Result<Value, HandlerErr> {
    let outcome = entry
        .session
        .request_submit(Utc::now())
        .map_err(|e| HandlerErr::new("bad_state", e.message()))?;
    match outcome {
        SubmitOutcome::NeedsConfirmation(unanswered) => Ok(json!({
            "phase": Phase::PendingConfirmation.key(),
            "unansweredQuestions": unanswered,
        })),
        SubmitOutcome::Submitted(score) => {
            let response_id = persist(store, entry, score)?;
            Ok(submitted_result(score, response_id))
        }
    }
}

fn confirm(
    store: &mut Store,
    entry: &mut ActiveSession,
    _params: &Value,
) -> Result<Value, HandlerErr> {
    let score = entry
        .session
        .confirm_submit(Utc::now())
        .map_err(|e| HandlerErr::new("bad_state", e.message()))?;
    let response_id = persist(store, entry, score)?;
    Ok(submitted_result(score, response_id))
}

fn cancel(entry: &mut ActiveSession, _params: &Value) -> Result<Value, HandlerErr> {
    entry
        .session
        .cancel_submit(Utc::now())
        .map_err(|e| HandlerErr::new("bad_state", e.message()))?;
    Ok(json!({ "phase": entry.session.phase().key() }))
}

fn sheet(entry: &mut ActiveSession, _params: &Value) -> Result<Value, HandlerErr> {
    if entry.session.phase() != Phase::Submitted {
        return Err(HandlerErr::new(
            "bad_state",
            "response sheet is available after submission",
        ));
    }
    Ok(json!({
        "score": entry.session.score(),
        "rows": entry.session.sheet_rows(),
    }))
}

fn list_for_quiz(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let node = node_param(params)?;
    if node.level() != Level::Quiz {
        return Err(HandlerErr::bad_params("path does not address a quiz"));
    }
    let responses = node
        .responses_key()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let docs = store
        .list(&responses)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "responses": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    }))
}

fn sheet_for_user(store: &Store, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let doc = store
        .get(path::RESPONSE_SHEETS, &user_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let responses = doc
        .and_then(|d| d.fields.get("responseSheet").cloned())
        .unwrap_or_else(|| json!([]));
    Ok(json!({ "userId": user_id, "responses": responses }))
}

fn with_session<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&mut Store, &mut ActiveSession, &Value) -> Result<Value, HandlerErr>,
{
    let AppState {
        store, sessions, ..
    } = state;
    let Some(store) = store.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session_id = match req.params.get("sessionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };
    let Some(entry) = sessions.get_mut(&session_id) else {
        return err(&req.id, "not_found", "unknown session", None);
    };
    match f(store, entry, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
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
        "quizSession.start" => {
            let AppState {
                store, sessions, ..
            } = state;
            let Some(store) = store.as_mut() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match start(store, sessions, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        "quizSession.status" => Some(with_session(state, req, status)),
        "quizSession.answer" => Some(with_session(state, req, answer)),
        "quizSession.submit" => Some(with_session(state, req, submit)),
        "quizSession.confirm" => Some(with_session(state, req, confirm)),
        "quizSession.cancel" => Some(with_session(state, req, |_, e, p| cancel(e, p))),
        "quizSession.sheet" => Some(with_session(state, req, |_, e, p| sheet(e, p))),
        "responses.listForQuiz" => Some(with_store(state, req, |s, p| list_for_quiz(s, p))),
        "responses.sheetForUser" => Some(with_store(state, req, |s, p| sheet_for_user(s, p))),
        _ => None,
    }
}

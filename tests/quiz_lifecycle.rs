use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_studyhubd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studyhubd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// ssc group + subject + unit; returns the unit's parent id chain.
fn seed_unit(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, String) {
    let group = request_ok(
        stdin,
        reader,
        "seed-1",
        "catalog.create",
        json!({ "track": "ssc", "parents": [], "name": "Class 10" }),
    );
    let group_id = group["id"].as_str().unwrap().to_string();
    let subject = request_ok(
        stdin,
        reader,
        "seed-2",
        "catalog.create",
        json!({ "track": "ssc", "parents": [group_id], "name": "Chemistry" }),
    );
    let subject_id = subject["id"].as_str().unwrap().to_string();
    let unit = request_ok(
        stdin,
        reader,
        "seed-3",
        "units.create",
        json!({
            "track": "ssc",
            "parents": [group_id, subject_id],
            "unitName": "Acids and Bases",
            "unitNumber": 1
        }),
    );
    let unit_id = unit["unitId"].as_str().unwrap().to_string();
    (group_id, subject_id, unit_id)
}

fn sample_questions() -> serde_json::Value {
    json!([{
        "question": "pH of pure water?",
        "options": ["5", "6", "7", "8"],
        "correctOption": "7",
        "explanation": "Neutral at 25C."
    }])
}

#[test]
fn quiz_numbers_are_single_use_per_unit() {
    let workspace = temp_dir("studyhub-quiz-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (group_id, subject_id, unit_id) = seed_unit(&mut stdin, &mut reader);
    let parents = json!([group_id, subject_id, unit_id]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "quizzes.create",
        json!({
            "track": "ssc",
            "parents": parents,
            "quizNumber": "1",
            "quizTitle": "Basics",
            "createdBy": "admin",
            "questions": sample_questions()
        }),
    );

    // Re-using the number must fail and must not touch the original.
    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({
            "track": "ssc",
            "parents": parents,
            "quizNumber": "1",
            "quizTitle": "Usurper",
            "createdBy": "admin",
            "questions": sample_questions()
        }),
    );
    assert_eq!(error_code(&dup), "duplicate_id");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quizzes.get",
        json!({ "track": "ssc", "ids": [group_id, subject_id, unit_id, "1"] }),
    );
    assert_eq!(fetched["quiz"]["fields"]["quizTitle"], "Basics");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn authoring_validates_question_shape() {
    let workspace = temp_dir("studyhub-quiz-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (group_id, subject_id, unit_id) = seed_unit(&mut stdin, &mut reader);
    let parents = json!([group_id, subject_id, unit_id]);

    // Correct option missing from the options.
    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "quizzes.create",
        json!({
            "track": "ssc",
            "parents": parents,
            "quizNumber": "1",
            "quizTitle": "Broken",
            "createdBy": "admin",
            "questions": [{
                "question": "pH of pure water?",
                "options": ["5", "6", "7", "8"],
                "correctOption": "9",
                "explanation": ""
            }]
        }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    // Three options instead of four.
    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({
            "track": "ssc",
            "parents": parents,
            "quizNumber": "1",
            "quizTitle": "Broken",
            "createdBy": "admin",
            "questions": [{
                "question": "pH of pure water?",
                "options": ["5", "6", "7"],
                "correctOption": "7",
                "explanation": ""
            }]
        }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    // No questions at all.
    let bad = request(
        &mut stdin,
        &mut reader,
        "4",
        "quizzes.create",
        json!({
            "track": "ssc",
            "parents": parents,
            "quizNumber": "1",
            "quizTitle": "Empty",
            "createdBy": "admin",
            "questions": []
        }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    // Nothing was written by any rejected attempt.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "quizzes.list",
        json!({ "track": "ssc", "parents": parents }),
    );
    assert!(listed["quizzes"].as_array().unwrap().is_empty());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn quiz_edit_and_delete() {
    let workspace = temp_dir("studyhub-quiz-edit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (group_id, subject_id, unit_id) = seed_unit(&mut stdin, &mut reader);
    let ids = json!([group_id, subject_id, unit_id, "1"]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "quizzes.create",
        json!({
            "track": "ssc",
            "parents": [group_id, subject_id, unit_id],
            "quizNumber": "1",
            "quizTitle": "Basics",
            "createdBy": "admin",
            "questions": sample_questions()
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.update",
        json!({ "track": "ssc", "ids": ids, "patch": { "quizTitle": "Basics v2" } }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quizzes.get",
        json!({ "track": "ssc", "ids": ids }),
    );
    assert_eq!(fetched["quiz"]["fields"]["quizTitle"], "Basics v2");
    // Untouched fields survive the merge.
    assert_eq!(fetched["quiz"]["fields"]["createdBy"], "admin");

    let bad = request(
        &mut stdin,
        &mut reader,
        "5",
        "quizzes.update",
        json!({
            "track": "ssc",
            "ids": ids,
            "patch": { "questions": [{ "question": "", "options": [], "correctOption": "", "explanation": "" }] }
        }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "quizzes.delete",
        json!({ "track": "ssc", "ids": ids }),
    );
    assert_eq!(report["documentsDeleted"], 1);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "quizzes.list",
        json!({ "track": "ssc", "parents": [group_id, subject_id, unit_id] }),
    );
    assert!(listed["quizzes"].as_array().unwrap().is_empty());

    let gone = request(
        &mut stdin,
        &mut reader,
        "8",
        "quizzes.get",
        json!({ "track": "ssc", "ids": ids }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

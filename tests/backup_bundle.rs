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

#[test]
fn bundle_round_trip_carries_catalog_and_blobs() {
    let source_ws = temp_dir("studyhub-backup-src");
    let restore_ws = temp_dir("studyhub-backup-dst");
    let bundle = source_ws.join("export.shbackup.zip");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source_ws.to_string_lossy() }),
    );
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "catalog.create",
        json!({ "track": "medical", "parents": [], "name": "First MBBS" }),
    );
    let group_id = group["id"].as_str().unwrap().to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "catalog.create",
        json!({ "track": "medical", "parents": [group_id], "name": "Anatomy" }),
    );
    let subject_id = subject["id"].as_str().unwrap().to_string();

    let pdf_src = source_ws.join("anatomy.pdf");
    std::fs::write(&pdf_src, b"pdf bytes").expect("write fixture");
    let uploaded = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "media.upload",
        json!({ "sourcePath": pdf_src.to_string_lossy(), "folder": "unit-pdfs" }),
    );
    let pdf_path = uploaded["storagePath"].as_str().unwrap().to_string();
    let pdf_sha = uploaded["sha256"].as_str().unwrap().to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "units.create",
        json!({
            "track": "medical",
            "parents": [group_id, subject_id],
            "unitName": "Upper Limb",
            "unitNumber": 1,
            "unitPdfPath": pdf_path
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": source_ws.to_string_lossy(),
            "outPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(exported["bundleFormat"], "studyhub-workspace-v1");
    assert_eq!(exported["blobCount"], 1);

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": restore_ws.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(imported["blobCount"], 1);
    assert_eq!(imported["reselectRequired"], true);

    // The restored workspace has the same catalog and the same blob bytes.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!({ "path": restore_ws.to_string_lossy() }),
    );
    let groups = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "catalog.list",
        json!({ "track": "medical", "parents": [] }),
    );
    let docs = groups["docs"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["fields"]["name"], "First MBBS");

    let units = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "units.list",
        json!({ "track": "medical", "parents": [group_id, subject_id] }),
    );
    assert_eq!(units["units"].as_array().unwrap().len(), 1);

    let blob = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "media.info",
        json!({ "storagePath": pdf_path }),
    );
    assert_eq!(blob["sha256"].as_str(), Some(pdf_sha.as_str()));

    let _ = std::fs::remove_dir_all(source_ws);
    let _ = std::fs::remove_dir_all(restore_ws);
}

#[test]
fn import_refuses_non_bundle_files() {
    let workspace = temp_dir("studyhub-backup-bad");
    let not_a_bundle = workspace.join("random.bin");
    std::fs::write(&not_a_bundle, b"not a zip at all").expect("write fixture");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let imported = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.join("restored").to_string_lossy(),
            "inPath": not_a_bundle.to_string_lossy()
        }),
    );
    assert_eq!(imported["ok"], false);
    assert_eq!(
        imported["error"]["code"].as_str(),
        Some("backup_import_failed")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

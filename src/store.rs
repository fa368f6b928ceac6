use anyhow::{anyhow, Context};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::db;

/// One document from the path-emulated store.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub fields: Value,
    pub created_at: String,
}

impl Document {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "fields": self.fields,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(String),
    Duplicate,
}

#[derive(Debug)]
pub enum RenameOutcome {
    Renamed,
    Duplicate,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub storage_path: String,
    pub size: u64,
    pub sha256: String,
}

impl BlobInfo {
    pub fn to_json(&self) -> Value {
        json!({
            "storagePath": self.storage_path,
            "size": self.size,
            "sha256": self.sha256,
        })
    }
}

/// The backend client: document store, blob store, and user auth over one
/// workspace. Constructed once per `workspace.select` and handed to every
/// handler; nothing here is global.
pub struct Store {
    conn: Connection,
    blob_root: PathBuf,
    touched: Vec<String>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

impl Store {
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        let conn = db::open_db(workspace)?;
        Ok(Store {
            conn,
            blob_root: workspace.join(db::BLOB_DIR),
            touched: Vec::new(),
        })
    }

    pub(crate) fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn note_touched(&mut self, collection: &str) {
        self.touched.push(collection.to_string());
    }

    /// Collections mutated since the last drain, deduplicated, for the
    /// subscription snapshot pass.
    pub fn take_touched(&mut self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in self.touched.drain(..) {
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    // ---- documents ----

    pub fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, fields, created_at FROM documents
             WHERE collection = ? ORDER BY created_at, id",
        )?;
        let docs = stmt
            .query_map([collection], |row| {
                let id: String = row.get(0)?;
                let fields: String = row.get(1)?;
                let created_at: String = row.get(2)?;
                Ok((id, fields, created_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(docs.len());
        for (id, fields, created_at) in docs {
            let fields: Value = serde_json::from_str(&fields)
                .with_context(|| format!("corrupt document {}/{}", collection, id))?;
            out.push(Document {
                id,
                fields,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn list_ids(&self, collection: &str) -> anyhow::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM documents WHERE collection = ? ORDER BY created_at, id")?;
        let ids = stmt
            .query_map([collection], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let row = self
            .conn
            .query_row(
                "SELECT fields, created_at FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |row| {
                    let fields: String = row.get(0)?;
                    let created_at: String = row.get(1)?;
                    Ok((fields, created_at))
                },
            )
            .optional()?;
        let Some((fields, created_at)) = row else {
            return Ok(None);
        };
        let fields: Value = serde_json::from_str(&fields)
            .with_context(|| format!("corrupt document {}/{}", collection, id))?;
        Ok(Some(Document {
            id: id.to_string(),
            fields,
            created_at,
        }))
    }

    /// Equality filter on one JSON field, the sibling-uniqueness probe.
    pub fn exists(&self, collection: &str, field: &str, value: &str) -> anyhow::Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents
                 WHERE collection = ?1 AND json_extract(fields, '$.' || ?2) = ?3
                 LIMIT 1",
                (collection, field, value),
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Same probe, ignoring one document (rename must not collide with self).
    pub fn exists_other(
        &self,
        collection: &str,
        excluded_id: &str,
        field: &str,
        value: &str,
    ) -> anyhow::Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents
                 WHERE collection = ?1 AND id <> ?2
                   AND json_extract(fields, '$.' || ?3) = ?4
                 LIMIT 1",
                (collection, excluded_id, field, value),
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert(&mut self, collection: &str, fields: &Value) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO documents(collection, id, fields, created_at) VALUES(?, ?, ?, ?)",
            (collection, &id, fields.to_string(), now_rfc3339()),
        )?;
        self.note_touched(collection);
        Ok(id)
    }

    /// Uniqueness check and insert in one transaction. The source system did
    /// the existence probe and the write as two separate requests; here both
    /// happen under the same lock, so duplicate siblings cannot slip through.
    pub fn insert_unique(
        &mut self,
        collection: &str,
        unique_field: &str,
        fields: &Value,
    ) -> anyhow::Result<InsertOutcome> {
        let value = fields
            .get(unique_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing unique field {}", unique_field))?
            .to_string();
        let tx = self.conn.unchecked_transaction()?;
        let found: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM documents
                 WHERE collection = ?1 AND json_extract(fields, '$.' || ?2) = ?3
                 LIMIT 1",
                (collection, unique_field, &value),
                |row| row.get(0),
            )
            .optional()?;
        if found.is_some() {
            return Ok(InsertOutcome::Duplicate);
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO documents(collection, id, fields, created_at) VALUES(?, ?, ?, ?)",
            (collection, &id, fields.to_string(), now_rfc3339()),
        )?;
        tx.commit()?;
        self.note_touched(collection);
        Ok(InsertOutcome::Inserted(id))
    }

    /// Insert with a caller-chosen id. An existing id is rejected, never
    /// overwritten: quizzes are keyed by a user-supplied quiz number and a
    /// re-used number must fail instead of clobbering the earlier quiz.
    pub fn create_with_id(
        &mut self,
        collection: &str,
        id: &str,
        fields: &Value,
    ) -> anyhow::Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO documents(collection, id, fields, created_at)
             VALUES(?, ?, ?, ?)",
            (collection, id, fields.to_string(), now_rfc3339()),
        )?;
        if inserted > 0 {
            self.note_touched(collection);
        }
        Ok(inserted > 0)
    }

    /// Shallow JSON merge of `patch` into the stored fields.
    pub fn update_merge(
        &mut self,
        collection: &str,
        id: &str,
        patch: &Value,
    ) -> anyhow::Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let row: Option<String> = tx
            .query_row(
                "SELECT fields FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = row else {
            return Ok(false);
        };
        let mut fields: Value = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt document {}/{}", collection, id))?;
        let (Some(target), Some(changes)) = (fields.as_object_mut(), patch.as_object()) else {
            return Err(anyhow!("document fields and patch must be JSON objects"));
        };
        for (k, v) in changes {
            target.insert(k.clone(), v.clone());
        }
        tx.execute(
            "UPDATE documents SET fields = ?, updated_at = ? WHERE collection = ? AND id = ?",
            (fields.to_string(), now_rfc3339(), collection, id),
        )?;
        tx.commit()?;
        self.note_touched(collection);
        Ok(true)
    }

    /// Rename under the sibling-uniqueness guard, self excluded.
    pub fn rename_unique(
        &mut self,
        collection: &str,
        id: &str,
        name_field: &str,
        value: &str,
    ) -> anyhow::Result<RenameOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let row: Option<String> = tx
            .query_row(
                "SELECT fields FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = row else {
            return Ok(RenameOutcome::NotFound);
        };
        let taken: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM documents
                 WHERE collection = ?1 AND id <> ?2
                   AND json_extract(fields, '$.' || ?3) = ?4
                 LIMIT 1",
                (collection, id, name_field, value),
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Ok(RenameOutcome::Duplicate);
        }
        let mut fields: Value = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt document {}/{}", collection, id))?;
        fields
            .as_object_mut()
            .ok_or_else(|| anyhow!("document fields must be a JSON object"))?
            .insert(name_field.to_string(), json!(value));
        tx.execute(
            "UPDATE documents SET fields = ?, updated_at = ? WHERE collection = ? AND id = ?",
            (fields.to_string(), now_rfc3339(), collection, id),
        )?;
        tx.commit()?;
        self.note_touched(collection);
        Ok(RenameOutcome::Renamed)
    }

    /// Removes one document only; descendants are the cascade engine's job.
    /// Idempotent so a resumed cascade can retry entries safely.
    pub fn delete_doc(&mut self, collection: &str, id: &str) -> anyhow::Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
        )?;
        if removed > 0 {
            self.note_touched(collection);
        }
        Ok(removed > 0)
    }

    /// Inserts the quiz response and appends it to the user's response sheet
    /// in one transaction, so a submission can never land in one place and
    /// not the other.
    pub fn record_quiz_response(
        &mut self,
        responses_collection: &str,
        user_id: &str,
        response: &Value,
    ) -> anyhow::Result<String> {
        let response_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO documents(collection, id, fields, created_at) VALUES(?, ?, ?, ?)",
            (responses_collection, &response_id, response.to_string(), &now),
        )?;

        let sheet: Option<String> = tx
            .query_row(
                "SELECT fields FROM documents WHERE collection = ? AND id = ?",
                (crate::path::RESPONSE_SHEETS, user_id),
                |row| row.get(0),
            )
            .optional()?;
        match sheet {
            Some(raw) => {
                let mut fields: Value = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt response sheet for {}", user_id))?;
                fields
                    .get_mut("responseSheet")
                    .and_then(|v| v.as_array_mut())
                    .ok_or_else(|| anyhow!("response sheet for {} has no array", user_id))?
                    .push(response.clone());
                tx.execute(
                    "UPDATE documents SET fields = ?, updated_at = ? WHERE collection = ? AND id = ?",
                    (fields.to_string(), &now, crate::path::RESPONSE_SHEETS, user_id),
                )?;
            }
            None => {
                let fields = json!({
                    "userId": user_id,
                    "responseSheet": [response],
                });
                tx.execute(
                    "INSERT INTO documents(collection, id, fields, created_at) VALUES(?, ?, ?, ?)",
                    (crate::path::RESPONSE_SHEETS, user_id, fields.to_string(), &now),
                )?;
            }
        }
        tx.commit()?;
        self.note_touched(responses_collection);
        self.note_touched(crate::path::RESPONSE_SHEETS);
        Ok(response_id)
    }

    // ---- blobs ----

    pub fn blob_put(&mut self, source: &Path, folder: &str) -> anyhow::Result<BlobInfo> {
        let bytes = std::fs::read(source)
            .with_context(|| format!("failed to read source file {}", source.to_string_lossy()))?;
        let mut name = Uuid::new_v4().to_string();
        if let Some(ext) = source.extension().and_then(|e| e.to_str()) {
            name.push('.');
            name.push_str(&ext.to_ascii_lowercase());
        }
        let storage_path = format!("{}/{}", folder, name);

        let dest = self.blob_root.join(&storage_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &bytes)
            .with_context(|| format!("failed to store blob {}", storage_path))?;

        let info = BlobInfo {
            storage_path: storage_path.clone(),
            size: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        };
        self.conn.execute(
            "INSERT INTO blobs(storage_path, size, sha256, created_at) VALUES(?, ?, ?, ?)",
            (&info.storage_path, info.size as i64, &info.sha256, now_rfc3339()),
        )?;
        Ok(info)
    }

    pub fn blob_info(&self, storage_path: &str) -> anyhow::Result<Option<BlobInfo>> {
        let row = self
            .conn
            .query_row(
                "SELECT size, sha256 FROM blobs WHERE storage_path = ?",
                [storage_path],
                |row| {
                    let size: i64 = row.get(0)?;
                    let sha256: String = row.get(1)?;
                    Ok((size, sha256))
                },
            )
            .optional()?;
        Ok(row.map(|(size, sha256)| BlobInfo {
            storage_path: storage_path.to_string(),
            size: size as u64,
            sha256,
        }))
    }

    pub fn blob_exists(&self, storage_path: &str) -> anyhow::Result<bool> {
        Ok(self.blob_info(storage_path)?.is_some())
    }

    /// A missing blob is a skip (`Ok(false)`), not an error; only a real
    /// filesystem failure on an indexed blob surfaces.
    pub fn blob_delete(&mut self, storage_path: &str) -> anyhow::Result<bool> {
        if self.blob_info(storage_path)?.is_none() {
            return Ok(false);
        }
        let file = self.blob_root.join(storage_path);
        if file.exists() {
            std::fs::remove_file(&file)
                .with_context(|| format!("failed to delete blob {}", storage_path))?;
        }
        self.conn
            .execute("DELETE FROM blobs WHERE storage_path = ?", [storage_path])?;
        Ok(true)
    }

    pub fn blob_root(&self) -> &Path {
        &self.blob_root
    }

    // ---- users ----

    /// `None` means the email is already registered.
    pub fn user_create(&mut self, email: &str, password: &str) -> anyhow::Result<Option<String>> {
        let email = email.trim().to_ascii_lowercase();
        let id = Uuid::new_v4().to_string();
        let salt = Uuid::new_v4().to_string();
        let hash = sha256_hex(format!("{}:{}", salt, password).as_bytes());
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO users(id, email, password_hash, salt, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (&id, &email, &hash, &salt, now_rfc3339()),
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// `None` covers both unknown email and wrong password; callers must not
    /// be able to tell which.
    pub fn user_authenticate(
        &mut self,
        email: &str,
        password: &str,
    ) -> anyhow::Result<Option<String>> {
        let email = email.trim().to_ascii_lowercase();
        let row = self
            .conn
            .query_row(
                "SELECT id, password_hash, salt FROM users WHERE email = ?",
                [&email],
                |row| {
                    let id: String = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let salt: String = row.get(2)?;
                    Ok((id, hash, salt))
                },
            )
            .optional()?;
        let Some((id, hash, salt)) = row else {
            return Ok(None);
        };
        if sha256_hex(format!("{}:{}", salt, password).as_bytes()) != hash {
            return Ok(None);
        }
        self.conn.execute(
            "UPDATE users SET last_login_at = ? WHERE id = ?",
            (now_rfc3339(), &id),
        )?;
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_store(prefix: &str) -> (Store, PathBuf) {
        let ws = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&ws).expect("create temp dir");
        (Store::open(&ws).expect("open store"), ws)
    }

    #[test]
    fn insert_unique_rejects_sibling_duplicates_only() {
        let (mut store, ws) = temp_store("studyhub-store-unique");
        let fields = json!({ "name": "First Year" });

        match store.insert_unique("degree/groups", "name", &fields).unwrap() {
            InsertOutcome::Inserted(_) => {}
            InsertOutcome::Duplicate => panic!("first insert must succeed"),
        }
        match store.insert_unique("degree/groups", "name", &fields).unwrap() {
            InsertOutcome::Duplicate => {}
            InsertOutcome::Inserted(_) => panic!("duplicate sibling must be rejected"),
        }
        assert_eq!(store.list("degree/groups").unwrap().len(), 1);

        // Same name under a different parent path is a different scope.
        match store.insert_unique("pg/groups", "name", &fields).unwrap() {
            InsertOutcome::Inserted(_) => {}
            InsertOutcome::Duplicate => panic!("other parents must not collide"),
        }
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn create_with_id_never_overwrites() {
        let (mut store, ws) = temp_store("studyhub-store-keyed");
        assert!(store
            .create_with_id("q", "7", &json!({ "quizTitle": "original" }))
            .unwrap());
        assert!(!store
            .create_with_id("q", "7", &json!({ "quizTitle": "usurper" }))
            .unwrap());
        let doc = store.get("q", "7").unwrap().unwrap();
        assert_eq!(doc.fields["quizTitle"], "original");
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn update_merge_keeps_untouched_fields() {
        let (mut store, ws) = temp_store("studyhub-store-merge");
        let id = store
            .insert("u", &json!({ "unitName": "Waves", "unitNumber": 1 }))
            .unwrap();
        assert!(store
            .update_merge("u", &id, &json!({ "unitNumber": 2 }))
            .unwrap());
        let doc = store.get("u", &id).unwrap().unwrap();
        assert_eq!(doc.fields["unitName"], "Waves");
        assert_eq!(doc.fields["unitNumber"], 2);
        assert!(!store
            .update_merge("u", "missing", &json!({ "unitNumber": 3 }))
            .unwrap());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn response_sheet_append_grows_one_entry_per_submission() {
        let (mut store, ws) = temp_store("studyhub-store-sheet");
        for n in 1..=3 {
            let response = json!({ "quizId": format!("{}", n), "marks": n });
            store
                .record_quiz_response("quiz/responses", "user-1", &response)
                .unwrap();
        }
        let sheet = store
            .get(crate::path::RESPONSE_SHEETS, "user-1")
            .unwrap()
            .unwrap();
        let entries = sheet.fields["responseSheet"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["quizId"], "1");
        assert_eq!(entries[2]["marks"], 3);
        assert_eq!(store.list("quiz/responses").unwrap().len(), 3);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn auth_round_trip_and_email_uniqueness() {
        let (mut store, ws) = temp_store("studyhub-store-auth");
        let id = store
            .user_create("Admin@Example.com", "secret1")
            .unwrap()
            .expect("first registration");
        assert!(store
            .user_create("admin@example.com", "other66")
            .unwrap()
            .is_none());

        assert_eq!(
            store
                .user_authenticate("admin@example.com", "secret1")
                .unwrap(),
            Some(id)
        );
        assert!(store
            .user_authenticate("admin@example.com", "wrong")
            .unwrap()
            .is_none());
        assert!(store
            .user_authenticate("nobody@example.com", "secret1")
            .unwrap()
            .is_none());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn blob_round_trip_and_missing_delete_is_skip() {
        let (mut store, ws) = temp_store("studyhub-store-blob");
        let src = ws.join("cover.png");
        std::fs::write(&src, b"image bytes").unwrap();

        let info = store.blob_put(&src, "unit-images").unwrap();
        assert!(info.storage_path.starts_with("unit-images/"));
        assert_eq!(info.size, 11);
        assert!(store.blob_exists(&info.storage_path).unwrap());

        assert!(store.blob_delete(&info.storage_path).unwrap());
        assert!(!store.blob_exists(&info.storage_path).unwrap());
        assert!(!store.blob_delete(&info.storage_path).unwrap());
        let _ = std::fs::remove_dir_all(ws);
    }
}

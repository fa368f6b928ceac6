use anyhow::Context;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::path::{Level, NodePath};
use crate::store::Store;

/// Unit fields that hold blob storage paths; their blobs die with the unit.
const UNIT_BLOB_FIELDS: &[&str] = &["unitImagePath", "unitPdfPath"];

#[derive(Debug)]
enum Entry {
    Doc { collection: String, id: String },
    Blob { storage_path: String },
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub cascade_id: String,
    pub documents_deleted: usize,
    pub blobs_deleted: usize,
    pub blobs_skipped: usize,
    pub remaining: usize,
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn to_json(&self) -> Value {
        json!({
            "cascadeId": self.cascade_id,
            "documentsDeleted": self.documents_deleted,
            "blobsDeleted": self.blobs_deleted,
            "blobsSkipped": self.blobs_skipped,
            "remaining": self.remaining,
            "errors": self.errors,
        })
    }
}

/// Plan + sweep in one call: the normal delete path.
pub fn delete_node(store: &mut Store, node: &NodePath) -> anyhow::Result<SweepReport> {
    let cascade_id = plan(store, node)?;
    sweep(store, &cascade_id)
}

/// Walks the subtree depth-first and records every doomed blob and document
/// into the persistent delete queue, in destruction order: a unit's blobs
/// before the unit document, children before their parent, the target node
/// last. One transaction, so a planned cascade is always complete.
pub fn plan(store: &mut Store, node: &NodePath) -> anyhow::Result<String> {
    let mut entries: Vec<Entry> = Vec::new();
    collect(store, node, &mut entries)?;

    let cascade_id = Uuid::new_v4().to_string();
    let tx = store.raw().unchecked_transaction()?;
    for (seq, entry) in entries.iter().enumerate() {
        match entry {
            Entry::Doc { collection, id } => tx.execute(
                "INSERT INTO delete_queue(cascade_id, seq, kind, collection, doc_id)
                 VALUES(?, ?, 'document', ?, ?)",
                (&cascade_id, seq as i64, collection, id),
            )?,
            Entry::Blob { storage_path } => tx.execute(
                "INSERT INTO delete_queue(cascade_id, seq, kind, storage_path)
                 VALUES(?, ?, 'blob', ?)",
                (&cascade_id, seq as i64, storage_path),
            )?,
        };
    }
    tx.commit()?;
    Ok(cascade_id)
}

fn collect(store: &Store, node: &NodePath, out: &mut Vec<Entry>) -> anyhow::Result<()> {
    match node.level() {
        Level::Quiz => {
            let responses = node.responses_key()?;
            for id in store.list_ids(&responses)? {
                out.push(Entry::Doc {
                    collection: responses.clone(),
                    id,
                });
            }
        }
        Level::Unit => {
            if let Some(children) = node.child_collection() {
                let key = children.storage_key();
                for id in store.list_ids(&key)? {
                    collect(store, &children.node(&id)?, out)?;
                }
            }
            if let Some(doc) = store.get(&node.collection().storage_key(), node.doc_id())? {
                for field in UNIT_BLOB_FIELDS {
                    if let Some(path) = doc.fields.get(*field).and_then(|v| v.as_str()) {
                        out.push(Entry::Blob {
                            storage_path: path.to_string(),
                        });
                    }
                }
            }
        }
        _ => {
            if let Some(children) = node.child_collection() {
                let key = children.storage_key();
                for id in store.list_ids(&key)? {
                    collect(store, &children.node(&id)?, out)?;
                }
            }
        }
    }
    out.push(Entry::Doc {
        collection: node.collection().storage_key(),
        id: node.doc_id().to_string(),
    });
    Ok(())
}

/// Processes queue entries in planned order. Document deletes and their
/// queue-row removal share a transaction; a missing blob is skipped; a blob
/// failure is recorded and the sweep moves on, leaving the entry queued for
/// a later resume. Re-running a partly swept cascade is safe: deletes are
/// idempotent and swept rows are gone from the queue.
pub fn sweep(store: &mut Store, cascade_id: &str) -> anyhow::Result<SweepReport> {
    let rows: Vec<(i64, String, Option<String>, Option<String>, Option<String>)> = {
        let mut stmt = store.raw().prepare(
            "SELECT seq, kind, collection, doc_id, storage_path
             FROM delete_queue WHERE cascade_id = ? ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([cascade_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut report = SweepReport {
        cascade_id: cascade_id.to_string(),
        documents_deleted: 0,
        blobs_deleted: 0,
        blobs_skipped: 0,
        remaining: 0,
        errors: Vec::new(),
    };

    for (seq, kind, collection, doc_id, storage_path) in rows {
        match kind.as_str() {
            "blob" => {
                let path = storage_path.unwrap_or_default();
                match store.blob_delete(&path) {
                    Ok(true) => {
                        report.blobs_deleted += 1;
                        dequeue(store, cascade_id, seq)?;
                    }
                    Ok(false) => {
                        report.blobs_skipped += 1;
                        dequeue(store, cascade_id, seq)?;
                    }
                    Err(e) => report.errors.push(format!("blob {}: {}", path, e)),
                }
            }
            "document" => {
                let collection = collection.unwrap_or_default();
                let id = doc_id.unwrap_or_default();
                match delete_doc_entry(store, cascade_id, seq, &collection, &id) {
                    Ok(deleted) => {
                        if deleted {
                            report.documents_deleted += 1;
                            store.note_touched(&collection);
                        }
                    }
                    Err(e) => report
                        .errors
                        .push(format!("document {}/{}: {}", collection, id, e)),
                }
            }
            other => report.errors.push(format!("entry {}: unknown kind {}", seq, other)),
        }
    }

    report.remaining = pending_count(store, cascade_id)?;
    Ok(report)
}

fn dequeue(store: &Store, cascade_id: &str, seq: i64) -> anyhow::Result<()> {
    store
        .raw()
        .execute(
            "DELETE FROM delete_queue WHERE cascade_id = ? AND seq = ?",
            (cascade_id, seq),
        )
        .context("failed to remove swept queue entry")?;
    Ok(())
}

fn delete_doc_entry(
    store: &Store,
    cascade_id: &str,
    seq: i64,
    collection: &str,
    id: &str,
) -> anyhow::Result<bool> {
    let tx = store.raw().unchecked_transaction()?;
    let deleted = tx.execute(
        "DELETE FROM documents WHERE collection = ? AND id = ?",
        (collection, id),
    )?;
    tx.execute(
        "DELETE FROM delete_queue WHERE cascade_id = ? AND seq = ?",
        (cascade_id, seq),
    )?;
    tx.commit()?;
    Ok(deleted > 0)
}

fn pending_count(store: &Store, cascade_id: &str) -> anyhow::Result<usize> {
    let count: i64 = store.raw().query_row(
        "SELECT COUNT(*) FROM delete_queue WHERE cascade_id = ?",
        [cascade_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Cascades with unswept entries, oldest first.
pub fn pending(store: &Store) -> anyhow::Result<Vec<(String, usize)>> {
    let mut stmt = store.raw().prepare(
        "SELECT cascade_id, COUNT(*) FROM delete_queue
         GROUP BY cascade_id ORDER BY MIN(seq)",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            Ok((id, n as usize))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Re-sweeps every pending cascade; used after a crash or a blob-store
/// failure left entries behind.
pub fn resume_all(store: &mut Store) -> anyhow::Result<Vec<SweepReport>> {
    let ids: Vec<String> = pending(store)?.into_iter().map(|(id, _)| id).collect();
    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        reports.push(sweep(store, &id)?);
    }
    Ok(reports)
}

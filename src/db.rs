use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "studyhub.sqlite3";
pub const BLOB_DIR: &str = "blobs";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    std::fs::create_dir_all(workspace.join(BLOB_DIR))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Path-emulated document store: one row per document, JSON fields.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(collection, id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS blobs(
            storage_path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_users_last_login(&conn)?;

    // Persistent cascade queue: planned deletions survive a crash and can be
    // swept again without double-deleting (document deletes are idempotent).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS delete_queue(
            cascade_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            kind TEXT NOT NULL,
            collection TEXT,
            doc_id TEXT,
            storage_path TEXT,
            PRIMARY KEY(cascade_id, seq)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_delete_queue_cascade ON delete_queue(cascade_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_last_login(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "last_login_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN last_login_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

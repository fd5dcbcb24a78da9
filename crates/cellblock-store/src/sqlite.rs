//! SQLite-based store implementation

use cellblock_util::SubjectId;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::{Document, RecordStore, StoreError, StoreResult, StoredDocument};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- One document per prisoner
            CREATE TABLE IF NOT EXISTS prisoners (
                uuid TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Jail list (single row)
            CREATE TABLE IF NOT EXISTS jails (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn decode(key: &str, text: &str) -> Option<Document> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            error!(record = key, "Stored document is not a map; skipping");
            None
        }
        Err(e) => {
            error!(record = key, error = %e, "Stored document is not valid JSON; skipping");
            None
        }
    }
}

impl RecordStore for SqliteStore {
    fn put_prisoner(&self, id: &SubjectId, document: &Document) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(document)?;

        conn.execute(
            r#"
            INSERT INTO prisoners (uuid, document, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(uuid)
            DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at
            "#,
            params![id.to_string(), json, cellblock_util::now().to_rfc3339()],
        )?;

        debug!(subject = %id, "Prisoner document written");
        Ok(())
    }

    fn delete_prisoner(&self, id: &SubjectId) -> StoreResult<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM prisoners WHERE uuid = ?", [id.to_string()])?;
        debug!(subject = %id, removed, "Prisoner document deleted");
        Ok(())
    }

    fn prisoner_documents(&self) -> StoreResult<Vec<StoredDocument>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT uuid, document FROM prisoners ORDER BY uuid")?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let document: String = row.get(1)?;
            Ok((key, document))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (key, text) = row?;
            if let Some(document) = decode(&key, &text) {
                documents.push(StoredDocument { key, document });
            }
        }

        Ok(documents)
    }

    fn put_jails(&self, document: &Document) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(document)?;

        conn.execute(
            r#"
            INSERT INTO jails (id, document, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at
            "#,
            params![json, cellblock_util::now().to_rfc3339()],
        )?;

        debug!("Jail document written");
        Ok(())
    }

    fn jails_document(&self) -> StoreResult<Option<Document>> {
        let conn = self.conn()?;

        let text: Option<String> = conn
            .query_row("SELECT document FROM jails WHERE id = 1", [], |row| row.get(0))
            .optional()?;

        Ok(text.and_then(|t| decode("jails", &t)))
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

//! Local persistent storage.
//!
//! The business entities (assets, costs, stakeholders…) are plain records to
//! this process: a `kind`, an `id` and a JSON payload. The host only needs to
//! open a connection, check it cheaply and hand it to the bridge.
//!
//! [`StorageOpener`] and [`StorageHealth`] are the seams the resilience
//! manager works against, so its retry loop can be exercised without a
//! failing disk.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{HostError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    kind       TEXT    NOT NULL,
    id         TEXT    NOT NULL,
    payload    TEXT    NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    PRIMARY KEY (kind, id)
);
";

/// Cheap reachability check, distinct from a real query.
pub trait StorageHealth {
    fn can_connect(&self) -> bool;
}

/// Produces storage connections on demand.
pub trait StorageOpener {
    type Connection: StorageHealth;

    /// Human-readable location, used in log lines and errors.
    fn location(&self) -> String;

    fn open(&self) -> Result<Self::Connection>;
}

/// One stored record as seen by the hosted UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: String,
    pub id: String,
    pub payload: Value,
    pub updated_at: i64,
}

/// SQLite-backed storage connection.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| HostError::StorageUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn list(&self, kind: &str) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, id, payload, updated_at FROM records WHERE kind = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![kind], row_to_parts)?;
        rows.map(|row| record_from_parts(row?)).collect()
    }

    pub fn get(&self, kind: &str, id: &str) -> Result<Option<Record>> {
        let parts = self
            .conn
            .query_row(
                "SELECT kind, id, payload, updated_at FROM records WHERE kind = ?1 AND id = ?2",
                params![kind, id],
                row_to_parts,
            )
            .optional()?;
        parts.map(record_from_parts).transpose()
    }

    /// Inserts or replaces a record. A missing id gets a random one.
    pub fn upsert(&self, kind: &str, id: Option<&str>, payload: &Value) -> Result<Record> {
        let id = match id {
            Some(id) => id.to_string(),
            None => self
                .conn
                .query_row("SELECT lower(hex(randomblob(16)))", [], |row| row.get(0))?,
        };
        self.conn.execute(
            "INSERT INTO records (kind, id, payload, updated_at)
             VALUES (?1, ?2, ?3, strftime('%s','now'))
             ON CONFLICT(kind, id) DO UPDATE
             SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![kind, id, serde_json::to_string(payload)?],
        )?;
        debug!(kind, id, "Record upserted");
        self.get(kind, &id)?
            .ok_or(HostError::Storage(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, kind: &str, id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM records WHERE kind = ?1 AND id = ?2", params![kind, id])?;
        Ok(n > 0)
    }
}

impl StorageHealth for Store {
    fn can_connect(&self) -> bool {
        match self
            .conn
            .query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
        {
            Ok(_) => true,
            Err(e) => {
                warn!(path = ?self.path(), error = %e, "Storage check failed");
                false
            }
        }
    }
}

type RecordParts = (String, String, String, i64);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordParts> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn record_from_parts((kind, id, payload, updated_at): RecordParts) -> Result<Record> {
    Ok(Record {
        kind,
        id,
        payload: serde_json::from_str(&payload)?,
        updated_at,
    })
}

/// Opens [`Store`]s from a database path.
#[derive(Debug, Clone)]
pub struct SqliteOpener {
    path: PathBuf,
}

impl SqliteOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageOpener for SqliteOpener {
    type Connection = Store;

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Store> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            return Err(HostError::StorageUnavailable {
                path: self.path.clone(),
                reason: format!("directory {} does not exist", parent.display()),
            });
        }
        Store::open(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_store_is_reachable() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.can_connect());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_upsert_get_list_delete() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert("asset", Some("a-2"), &json!({"name": "Forklift"}))
            .unwrap();
        let first = store
            .upsert("asset", Some("a-1"), &json!({"name": "Pallet jack"}))
            .unwrap();
        assert_eq!(first.payload["name"], "Pallet jack");

        let listed = store.list("asset").unwrap();
        assert_eq!(
            listed.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a-1", "a-2"]
        );
        assert!(store.list("cost").unwrap().is_empty());

        assert!(store.delete("asset", "a-1").unwrap());
        assert!(!store.delete("asset", "a-1").unwrap());
        assert!(store.get("asset", "a-1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_payload() {
        let store = Store::open_in_memory().unwrap();
        store.upsert("cost", Some("c"), &json!({"amount": 1})).unwrap();
        store.upsert("cost", Some("c"), &json!({"amount": 2})).unwrap();
        let record = store.get("cost", "c").unwrap().unwrap();
        assert_eq!(record.payload["amount"], 2);
        assert_eq!(store.list("cost").unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_without_id_generates_one() {
        let store = Store::open_in_memory().unwrap();
        let record = store
            .upsert("stakeholder", None, &json!({"name": "Ops"}))
            .unwrap();
        assert_eq!(record.id.len(), 32);
    }

    #[test]
    fn test_opener_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SqliteOpener::new(dir.path().join("missing").join("kiosk.db"));
        let err = opener.open().err().unwrap();
        assert!(matches!(err, HostError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_opener_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.db");
        let store = SqliteOpener::new(&path).open().unwrap();
        assert!(store.can_connect());
        assert!(path.is_file());
    }
}

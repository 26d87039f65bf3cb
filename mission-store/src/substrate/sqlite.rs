//! SQLite substrate.
//!
//! One `kv` table, one connection behind a mutex. Prefix queries compare
//! `substr(key, 1, n)` instead of `LIKE` so keys containing `%` or `_`
//! match literally.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::Substrate;
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

/// Substrate stored in a single SQLite file.
pub struct SqliteSubstrate {
    conn: Mutex<Connection>,
}

impl SqliteSubstrate {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        info!("Opening SQLite substrate at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let substrate = Self {
            conn: Mutex::new(conn),
        };
        substrate.init_schema()?;
        Ok(substrate)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("Opening in-memory SQLite substrate");

        let substrate = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        substrate.init_schema()?;
        Ok(substrate)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Substrate for SqliteSubstrate {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn delete_by_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM kv WHERE substr(key, 1, ?2) = ?1",
            params![prefix, prefix.chars().count() as i64],
        )?;
        Ok(removed)
    }
}

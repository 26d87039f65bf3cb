//! Persistent key/value substrate.
//!
//! The store keeps everything in one flat, string-keyed map with no
//! transactions and no secondary indexes. Namespacing is purely a key
//! convention (see [`crate::keys`]), so any backend that can answer the five
//! calls below can host it:
//!
//! - [`MemorySubstrate`] - in-process map with an optional byte quota
//! - [`SqliteSubstrate`] - single-table SQLite file for native hosts

pub mod memory;
pub mod sqlite;

pub use memory::MemorySubstrate;
pub use sqlite::SqliteSubstrate;

use crate::error::StoreResult;

/// Flat string-keyed storage backend.
pub trait Substrate: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// List every key starting with `prefix`, in lexical order.
    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    fn delete_by_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let keys = self.list_keys(prefix)?;
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }
}

//! Key-value persistence behind the subscription ledger.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use super::schema;
use crate::error::{Error, Result};

/// Minimal string key-value store.
///
/// Implementations must be safe to call from any thread. Errors are reported,
/// never panicked on; callers treat a failed read as a miss.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    /// All keys, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed store. Survives restarts.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Store(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Store(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Store(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Store(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Volatile store. Lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("a").unwrap(), None);

        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        store.put("a", "3").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("3".to_string()));

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        store.delete("a").unwrap();
        store.delete("missing").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.keys().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_in_memory() {
        exercise(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("sub:wss://relay.example.com", "{}").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("sub:wss://relay.example.com").unwrap(),
            Some("{}".to_string())
        );
    }
}

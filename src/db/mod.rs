//! SQLite persistence.
//!
//! A single connection sits behind a mutex. Every multi-step side effect goes
//! through [`Database::write`], which runs inside an `IMMEDIATE` transaction so
//! concurrent workers touching the same photo, face or suggestion rows are
//! serialized. Per-entity queries are free functions taking a `&Connection`,
//! which a `&Transaction` derefs to.

mod schema;
pub mod faces;
pub mod people;
pub mod photos;
pub mod suggestions;
pub mod watch_folders;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use faces::{BoundingBox, Face, FaceEmbedding, NewFace};
pub use people::Person;
pub use photos::{Photo, PhotoMetadata};
pub use schema::SCHEMA;
pub use suggestions::{Suggestion, SuggestionStatus};
pub use watch_folders::WatchFolder;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::StoreFailure(format!("connection lock poisoned: {}", e)))
    }

    /// Run read-only queries against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Any error rolls everything back.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("facefold.db");

        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        // Idempotent on an existing file
        db.initialize().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<()> = db.write(|tx| {
            people::create(tx, "Ada", chrono::Utc::now())?;
            Err(Error::StoreFailure("boom".into()))
        });
        assert!(result.is_err());

        let people = db.read(|conn| people::list(conn)).unwrap();
        assert!(people.is_empty());
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let result = db.write(|tx| {
            people::link_photo(tx, 1, 1, chrono::Utc::now())?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::StoreFailure(_))));
    }
}

//! SQLite connection handle shared by the repositories.
//!
//! Each worker process opens its own `Database` on the same file. WAL lets
//! readers proceed while one writer commits, and the busy timeout turns lock
//! contention into a short wait instead of an error.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use warden_core::error::WardenError;

use crate::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection, serialized behind a mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file, creating parent directories, and migrate it.
    pub fn new(path: &Path) -> Result<Self, WardenError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| WardenError::Storage(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| WardenError::Storage(format!("Failed to set busy timeout: {}", e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| WardenError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!(path = %path.display(), "Warden database opened");
        Self::migrated(conn)
    }

    /// A private in-memory database. Test fixtures use this.
    pub fn in_memory() -> Result<Self, WardenError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WardenError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| WardenError::Storage(format!("Failed to set pragmas: {}", e)))?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, WardenError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` while holding this handle's connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, WardenError>
    where
        F: FnOnce(&Connection) -> Result<T, WardenError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WardenError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken before `f` reads anything, so a read-check-write
    /// sequence in `f` cannot interleave with another connection's. Commits
    /// when `f` returns `Ok`; rolls back otherwise.
    pub fn with_write_tx<F, T>(&self, f: F) -> Result<T, WardenError>
    where
        F: FnOnce(&Connection) -> Result<T, WardenError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| WardenError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| WardenError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| WardenError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(out)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

//! SQLite home of the job table.
//!
//! One connection is shared behind a mutex. Reads go through
//! [`Database::with_conn`]; every write goes through
//! [`Database::with_write`], which wraps it in an `IMMEDIATE` transaction
//! so the write lock is taken before anything is read. Async callers reach
//! the handle through the blocking pool (see `JobStore`'s `*_async`
//! methods), never from a runtime worker thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_PRAGMAS: &str = "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;";

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the job database at `path`, creating parent
    /// directories and applying pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(FILE_PRAGMAS)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self::migrated(conn)?;

        log::info!("Job database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Read access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` in an `IMMEDIATE` transaction. Commits if `f` succeeds and
    /// rolls back otherwise.
    pub fn with_write<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Returns the canonical database path: `~/.scribe/data/scribe.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".scribe").join("data").join("scribe.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_count(db: &Database) -> u32 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?))
            .unwrap()
    }

    fn insert_sql(id: &str) -> String {
        format!(
            "INSERT INTO jobs (id, subject_id, created_at, updated_at) \
             VALUES ('{}', 'f.mp3', '2026-01-01', '2026-01-01')",
            id
        )
    }

    #[test]
    fn test_open_file_db_creates_parents_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        let db = Database::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(job_count(&db), 0);

        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_write_commits_on_success() {
        let db = Database::open_in_memory().unwrap();
        db.with_write(|tx| {
            tx.execute(&insert_sql("t1"), [])?;
            Ok(())
        })
        .unwrap();

        // Clones share the connection.
        assert_eq!(job_count(&db.clone()), 1);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_write(|tx| {
            tx.execute(&insert_sql("t1"), [])?;
            Err(DatabaseError::InvalidRow {
                id: "t1".to_string(),
                reason: "abort".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(job_count(&db), 0);
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("scribe.db"));
        assert!(path.to_string_lossy().contains(".scribe"));
    }
}

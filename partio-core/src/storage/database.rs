use crate::error::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database file shared by the metadata store and transaction runner.
///
/// Every caller opens its own connection, so unrelated workflows never share
/// connection state.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let database = Self { path };
        database.init_schema()?;
        Ok(database)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Required for ON DELETE CASCADE; off by default per connection.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;

        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('in_progress', 'done')),
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS parts (
                id TEXT PRIMARY KEY,
                upload_id TEXT NOT NULL REFERENCES uploads(id) ON DELETE CASCADE,
                backend_address TEXT NOT NULL,
                number INTEGER NOT NULL,
                size INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('in_progress', 'done')),
                created_at TEXT NOT NULL,
                UNIQUE (upload_id, number)
            )",
            [],
        )?;

        // Dangling-part scan
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_parts_status_created
             ON parts(status, created_at)",
            [],
        )?;

        Ok(())
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
  id              TEXT PRIMARY KEY,
  type            TEXT NOT NULL,
  params          TEXT NOT NULL DEFAULT '{}',
  status          TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending','assigned','running','completed','failed','quarantined')),
  priority        INTEGER NOT NULL DEFAULT 0,
  worker_id       TEXT,
  result          TEXT,
  result_hash     TEXT,
  created_at      INTEGER NOT NULL,
  claimed_at      INTEGER,
  heartbeat_at    INTEGER,
  completed_at    INTEGER,
  attempts        INTEGER NOT NULL DEFAULT 0,
  max_attempts    INTEGER NOT NULL DEFAULT 3,
  max_runtime_ms  INTEGER NOT NULL DEFAULT 300000,
  fail_reason     TEXT,
  fail_history    TEXT NOT NULL DEFAULT '[]',
  solver_url      TEXT,
  solver_checksum TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_priority
  ON jobs(status, priority DESC, created_at ASC);

CREATE INDEX IF NOT EXISTS idx_jobs_worker
  ON jobs(worker_id, status);

CREATE TABLE IF NOT EXISTS workers (
  id              TEXT PRIMARY KEY,
  name            TEXT,
  cores           INTEGER NOT NULL DEFAULT 1,
  ram_gb          REAL NOT NULL DEFAULT 1.0,
  tags            TEXT NOT NULL DEFAULT '[]',
  registered_at   INTEGER NOT NULL,
  last_heartbeat  INTEGER
);
"#;

/// Shared handle to the hub database.
///
/// Cloning is cheap; all clones serialize on the same connection mutex.
/// The guard is never held across an await point, so every store operation
/// is one uninterrupted critical section from SELECT to COMMIT.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self::init(conn)?;
        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

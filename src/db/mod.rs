//! Local data store: durable mirror of stories plus the outbound operation queue.

mod operations;
mod records;
pub mod schema;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// Prefix of ids synthesized for records written while offline.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// SQLite-backed local store.
///
/// Each public call locks the connection for one statement or one
/// transaction. Nothing is held across calls.
pub struct LocalStore {
  conn: Mutex<Connection>,
  last_local_id: AtomicI64,
}

impl LocalStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("Failed to create data directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::Storage(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;
    debug!(path = %path.display(), "opened local store");
    Self::with_connection(conn)
  }

  /// In-memory store, used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
      last_local_id: AtomicI64::new(0),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Bring the schema up to [`schema::SCHEMA_VERSION`].
  ///
  /// Each step runs in its own transaction together with the version bump,
  /// and every statement is `IF NOT EXISTS`, so re-running is harmless.
  fn run_migrations(&self) -> Result<()> {
    let mut conn = self.lock()?;
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, step) in schema::MIGRATIONS.iter().enumerate() {
      let version = idx as i64 + 1;
      if version <= current {
        continue;
      }
      let tx = conn.transaction()?;
      tx.execute_batch(step)
        .map_err(|e| SyncError::Storage(format!("Migration {} failed: {}", version, e)))?;
      tx.pragma_update(None, "user_version", version)?;
      tx.commit()?;
      info!(version, "migrated local store");
    }
    Ok(())
  }

  pub fn schema_version(&self) -> Result<i64> {
    let conn = self.lock()?;
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
  }

  #[cfg(test)]
  pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
    self.lock()?.execute_batch(sql)?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Synthesize a local id: `local-<unix millis>`, strictly increasing.
  fn next_local_id(&self) -> String {
    let now = Utc::now().timestamp_millis();
    let mut last = self.last_local_id.load(Ordering::SeqCst);
    loop {
      let candidate = now.max(last + 1);
      match self.last_local_id.compare_exchange(
        last,
        candidate,
        Ordering::SeqCst,
        Ordering::SeqCst,
      ) {
        Ok(_) => return format!("{}{}", LOCAL_ID_PREFIX, candidate),
        Err(actual) => last = actual,
      }
    }
  }
}

/// Current time in the same RFC 3339 shape the server uses.
pub fn now_rfc3339() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

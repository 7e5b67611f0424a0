//! The `operations` collection: the durable side of the sync queue.

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use super::records::{authoritative, upsert};
use super::{now_rfc3339, LocalStore};
use crate::api::types::{Story, StoryRecord};
use crate::error::{Result, SyncError};
use crate::sync::queue::{Operation, OperationStatus, QueueEntry};

const SELECT_ENTRY: &str = "SELECT id, type, payload, status, retry_count, last_error, created_at, next_attempt_at
   FROM operations";

impl LocalStore {
  /// Persist an operation as `pending` with no retries yet.
  ///
  /// This only stores; triggering a replay is the coordinator's half of enqueue.
  pub fn enqueue(&self, operation: &Operation) -> Result<i64> {
    operation.validate()?;
    let payload = serde_json::to_string(operation)?;

    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO operations (type, payload, status, retry_count, created_at)
       VALUES (?1, ?2, ?3, 0, ?4)",
      params![
        operation.op_type(),
        payload,
        OperationStatus::Pending.as_str(),
        now_rfc3339()
      ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, op_type = operation.op_type(), "queued operation");
    Ok(id)
  }

  /// Entries of one type in insertion order.
  pub fn operations_by_type(&self, op_type: &str) -> Result<Vec<QueueEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(&format!("{} WHERE type = ?1 ORDER BY id", SELECT_ENTRY))?;
    let rows = stmt.query_map(params![op_type], read_row)?;
    collect_entries(rows)
  }

  pub fn all_operations(&self) -> Result<Vec<QueueEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_ENTRY))?;
    let rows = stmt.query_map([], read_row)?;
    collect_entries(rows)
  }

  pub fn get_operation(&self, id: i64) -> Result<Option<QueueEntry>> {
    let conn = self.lock()?;
    let raw = conn
      .query_row(&format!("{} WHERE id = ?1", SELECT_ENTRY), params![id], read_row)
      .optional()?;
    raw.map(RawEntry::into_entry).transpose()
  }

  /// Discard a queued operation together with the local record waiting on
  /// it. Returns whether the entry existed.
  pub fn drop_operation(&self, id: i64) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let payload: Option<String> = tx
      .query_row(
        "SELECT payload FROM operations WHERE id = ?1",
        params![id],
        |row| row.get(0),
      )
      .optional()?;
    let Some(payload) = payload else {
      return Ok(false);
    };
    let operation: Operation = serde_json::from_str(&payload)?;

    tx.execute("DELETE FROM operations WHERE id = ?1", params![id])?;
    tx.execute(
      "DELETE FROM records WHERE id = ?1 AND is_local = 1",
      params![operation.local_id()],
    )?;
    tx.commit()?;
    debug!(id, local_id = operation.local_id(), "dropped queued operation");
    Ok(true)
  }

  /// Delete a record and any queued operation still waiting to publish it.
  /// Returns whether the record existed; a missing id is not an error.
  pub fn delete_story(&self, id: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let dropped = tx.execute(
      "DELETE FROM operations WHERE json_extract(payload, '$.local_id') = ?1",
      params![id],
    )?;
    let removed = tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
    tx.commit()?;
    if dropped > 0 {
      debug!(id, dropped, "deleted story with its queued operations");
    }
    Ok(removed > 0)
  }

  /// The server accepted a queued story: drop the entry and replace the
  /// local record by the server's copy, atomically.
  pub fn confirm_story(&self, op_id: i64, local_id: &str, story: Story) -> Result<StoryRecord> {
    let record = authoritative(story);
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM operations WHERE id = ?1", params![op_id])?;
    tx.execute("DELETE FROM records WHERE id = ?1", params![local_id])?;
    upsert(&tx, &record)?;
    tx.commit()?;
    debug!(op_id, local_id, id = %record.id, "confirmed queued story");
    Ok(record)
  }

  /// Record a failed attempt on the entry as it was when traversal read it.
  ///
  /// The retry counter is derived from that snapshot; a concurrent writer
  /// touching the same row is not detected.
  pub fn record_failure(
    &self,
    entry: &QueueEntry,
    error: &str,
    next_attempt_at: Option<&str>,
  ) -> Result<QueueEntry> {
    let updated = QueueEntry {
      status: OperationStatus::Failed,
      retry_count: entry.retry_count + 1,
      last_error: Some(error.to_string()),
      next_attempt_at: next_attempt_at.map(String::from),
      ..entry.clone()
    };

    let conn = self.lock()?;
    conn.execute(
      "UPDATE operations
       SET status = ?2, retry_count = ?3, last_error = ?4, next_attempt_at = ?5
       WHERE id = ?1",
      params![
        updated.id,
        updated.status.as_str(),
        updated.retry_count,
        updated.last_error,
        updated.next_attempt_at
      ],
    )?;
    Ok(updated)
  }
}

struct RawEntry {
  id: i64,
  op_type: String,
  payload: String,
  status: String,
  retry_count: u32,
  last_error: Option<String>,
  created_at: String,
  next_attempt_at: Option<String>,
}

impl RawEntry {
  fn into_entry(self) -> Result<QueueEntry> {
    let operation: Operation = serde_json::from_str(&self.payload)?;
    let status = OperationStatus::parse(&self.status).ok_or_else(|| {
      SyncError::Storage(format!(
        "operation {} has unknown status '{}'",
        self.id, self.status
      ))
    })?;
    if operation.op_type() != self.op_type {
      warn!(id = self.id, stored = %self.op_type, "queue type disagrees with payload");
    }
    Ok(QueueEntry {
      id: self.id,
      op_type: self.op_type,
      operation,
      status,
      retry_count: self.retry_count,
      last_error: self.last_error,
      created_at: self.created_at,
      next_attempt_at: self.next_attempt_at,
    })
  }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
  Ok(RawEntry {
    id: row.get(0)?,
    op_type: row.get(1)?,
    payload: row.get(2)?,
    status: row.get(3)?,
    retry_count: row.get(4)?,
    last_error: row.get(5)?,
    created_at: row.get(6)?,
    next_attempt_at: row.get(7)?,
  })
}

fn collect_entries(
  rows: impl Iterator<Item = rusqlite::Result<RawEntry>>,
) -> Result<Vec<QueueEntry>> {
  let mut entries = Vec::new();
  for raw in rows {
    entries.push(raw?.into_entry()?);
  }
  Ok(entries)
}

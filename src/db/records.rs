//! The `records` collection.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{now_rfc3339, LocalStore};
use crate::api::types::{Story, StoryInput, StoryRecord};
use crate::error::Result;

const UPSERT: &str = "INSERT INTO records (id, data, created_at, updated_at, is_local)
   VALUES (?1, ?2, ?3, ?4, ?5)
   ON CONFLICT(id) DO UPDATE SET
     data = excluded.data,
     created_at = excluded.created_at,
     updated_at = excluded.updated_at,
     is_local = excluded.is_local";

impl LocalStore {
  /// Insert or replace a record.
  ///
  /// A missing id is synthesized and marks the record as local-only.
  /// `updated_at` is always refreshed.
  pub fn put(&self, input: StoryInput) -> Result<StoryRecord> {
    let (id, is_local) = match input.id {
      Some(id) => (id, false),
      None => (self.next_local_id(), true),
    };
    let now = now_rfc3339();
    let record = StoryRecord {
      id,
      name: input.name,
      description: input.description,
      photo_url: input.photo_url,
      lat: input.lat,
      lon: input.lon,
      created_at: input.created_at.unwrap_or_else(|| now.clone()),
      updated_at: now,
      is_local,
    };

    let conn = self.lock()?;
    upsert(&conn, &record)?;
    debug!(id = %record.id, is_local, "stored record");
    Ok(record)
  }

  /// Merge an authoritative server record into the mirror.
  ///
  /// Records still waiting for their own sync are left alone; returns
  /// `None` when the incoming record was skipped for that reason.
  pub fn reconcile(&self, story: Story) -> Result<Option<StoryRecord>> {
    let record = authoritative(story);
    let conn = self.lock()?;
    let changed = conn.execute(
      &format!("{} WHERE records.is_local = 0", UPSERT),
      params![
        record.id,
        serde_json::to_string(&record)?,
        record.created_at,
        record.updated_at,
        record.is_local
      ],
    )?;
    if changed == 0 {
      debug!(id = %record.id, "kept unsynced local record");
      return Ok(None);
    }
    Ok(Some(record))
  }

  /// All records, oldest first.
  pub fn get_all(&self) -> Result<Vec<StoryRecord>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM records ORDER BY created_at ASC, id ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for data in rows {
      records.push(serde_json::from_str(&data?)?);
    }
    Ok(records)
  }

  pub fn get_by_id(&self, id: &str) -> Result<Option<StoryRecord>> {
    let conn = self.lock()?;
    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM records WHERE id = ?1",
        params![id],
        |row| row.get(0),
      )
      .optional()?;
    Ok(match data {
      Some(data) => Some(serde_json::from_str(&data)?),
      None => None,
    })
  }

  /// Overwrite an existing record, refreshing `updated_at`.
  pub fn update(&self, mut record: StoryRecord) -> Result<StoryRecord> {
    record.updated_at = now_rfc3339();
    let conn = self.lock()?;
    upsert(&conn, &record)?;
    Ok(record)
  }

  /// Delete a record. Returns whether it existed; a missing id is not an error.
  pub fn delete(&self, id: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn.execute("DELETE FROM records WHERE id = ?1", params![id])?;
    Ok(removed > 0)
  }
}

pub(super) fn authoritative(story: Story) -> StoryRecord {
  StoryRecord::from_remote(story, now_rfc3339())
}

pub(super) fn upsert(conn: &Connection, record: &StoryRecord) -> Result<()> {
  conn.execute(
    UPSERT,
    params![
      record.id,
      serde_json::to_string(record)?,
      record.created_at,
      record.updated_at,
      record.is_local
    ],
  )?;
  Ok(())
}

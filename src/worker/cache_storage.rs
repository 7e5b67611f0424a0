//! Named, versioned response caches backed by SQLite.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::http::{Request, Response, ResponseType};
use crate::error::{Result, SyncError};

/// Asset cache storage, kept in its own database apart from the local store.
pub struct AssetCache {
  conn: Mutex<Connection>,
}

impl AssetCache {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::Storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| SyncError::Storage(format!("Failed to run cache migrations: {}", e)))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Cache names in creation order.
  pub fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY id")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  /// Delete a cache and everything in it. Returns whether it existed.
  pub fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?1",
      params![name],
    )?;
    let removed = tx.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  /// Store one response, creating the cache if needed.
  pub fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_all(name, std::slice::from_ref(&(request.clone(), response.clone())))
  }

  /// Store every pair in one transaction: either all land or none do.
  pub fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?1)",
      params![name],
    )?;
    for (request, response) in entries {
      let headers = serde_json::to_string(&response.headers)?;
      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, request_key, method, url, status, kind, headers, body, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))",
        params![
          name,
          request.cache_key(),
          request.method.as_str(),
          request.url.as_str(),
          response.status,
          response.kind.as_str(),
          headers,
          response.body
        ],
      )?;
    }
    tx.commit()?;
    Ok(())
  }

  /// Look a request up across all caches, oldest cache first.
  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT e.status, e.kind, e.headers, e.body FROM cache_entries e
         INNER JOIN caches c ON c.name = e.cache_name
         WHERE e.request_key = ?1
         ORDER BY c.id
         LIMIT 1",
        params![request.cache_key()],
        read_response,
      )
      .optional()?;
    row.map(RawResponse::into_response).transpose()
  }

  pub fn entry_count(&self, name: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1",
      params![name],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  /// Refuse writes from now on, as a full or read-only disk would.
  #[cfg(test)]
  pub(crate) fn set_read_only(&self) -> Result<()> {
    self.lock()?.execute_batch("PRAGMA query_only = ON")?;
    Ok(())
  }

  /// Drop the entry table so every lookup and store errors.
  #[cfg(test)]
  pub(crate) fn break_storage(&self) -> Result<()> {
    self.lock()?.execute_batch("DROP TABLE cache_entries")?;
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

struct RawResponse {
  status: u16,
  kind: String,
  headers: String,
  body: Vec<u8>,
}

impl RawResponse {
  fn into_response(self) -> Result<Response> {
    let kind = ResponseType::parse(&self.kind)
      .ok_or_else(|| SyncError::Storage(format!("Unknown response type '{}'", self.kind)))?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers)?;
    Ok(Response {
      status: self.status,
      kind,
      headers,
      body: self.body,
    })
  }
}

fn read_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawResponse> {
  Ok(RawResponse {
    status: row.get(0)?,
    kind: row.get(1)?,
    headers: row.get(2)?,
    body: row.get(3)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:8080").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_put_and_match() {
    let cache = AssetCache::open_in_memory().unwrap();
    let mut resp = Response::new(200, ResponseType::Basic, "body { }");
    resp
      .headers
      .insert("content-type".into(), "text/css".into());
    cache.put("v1", &request("/app.css"), &resp).unwrap();

    assert_eq!(cache.match_request(&request("/app.css")).unwrap(), Some(resp));
    assert_eq!(cache.match_request(&request("/other.css")).unwrap(), None);
    assert_eq!(cache.entry_count("v1").unwrap(), 1);
    assert_eq!(cache.entry_count("v2").unwrap(), 0);
  }

  #[test]
  fn test_delete_cache_drops_entries() {
    let cache = AssetCache::open_in_memory().unwrap();
    let resp = Response::new(200, ResponseType::Basic, "x");
    cache.put("v1", &request("/a"), &resp).unwrap();
    cache.put("v2", &request("/b"), &resp).unwrap();
    assert_eq!(cache.cache_names().unwrap(), vec!["v1", "v2"]);

    assert!(cache.delete_cache("v1").unwrap());
    assert!(!cache.delete_cache("v1").unwrap());
    assert_eq!(cache.cache_names().unwrap(), vec!["v2"]);
    assert_eq!(cache.entry_count("v1").unwrap(), 0);
    assert_eq!(cache.match_request(&request("/a")).unwrap(), None);
  }

  #[test]
  fn test_older_cache_wins_across_caches() {
    let cache = AssetCache::open_in_memory().unwrap();
    let old = Response::new(200, ResponseType::Basic, "old");
    let new = Response::new(200, ResponseType::Basic, "new");
    cache.put("v1", &request("/a"), &old).unwrap();
    cache.put("v2", &request("/a"), &new).unwrap();
    cache.put("v1", &request("/b"), &old).unwrap();

    assert_eq!(cache.cache_names().unwrap(), vec!["v1", "v2"]);
    assert_eq!(cache.match_request(&request("/a")).unwrap(), Some(old));
  }

  #[test]
  fn test_hit_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assets.db");
    let mut resp = Response::new(200, ResponseType::Basic, vec![0u8, 159, 146, 150, 255]);
    resp
      .headers
      .insert("content-type".into(), "image/png".into());
    resp.headers.insert("etag".into(), "\"abc\"".into());

    {
      let cache = AssetCache::open(&path).unwrap();
      cache.put("v1", &request("/logo.png"), &resp).unwrap();
    }

    let reopened = AssetCache::open(&path).unwrap();
    let hit = reopened.match_request(&request("/logo.png")).unwrap().unwrap();
    assert_eq!(hit, resp);
    assert_eq!(hit.body, vec![0u8, 159, 146, 150, 255]);
    assert_eq!(reopened.cache_names().unwrap(), vec!["v1"]);
  }
}

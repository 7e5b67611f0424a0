/// Version the schema reaches after all migrations ran.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Ordered migration steps; step `n` brings `user_version` to `n + 1`.
pub const MIGRATIONS: &[&str] = &[V1];

const V1: &str = r#"
-- Mirrored stories (serialized JSON plus the columns we sort and filter on)
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_local INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);

-- Outbound operations awaiting confirmation from the server
CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    next_attempt_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_operations_type ON operations(type);
"#;

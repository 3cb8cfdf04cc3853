//! Database schema for crawl state

/// Bumped whenever a table changes shape
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl run
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    pages_processed INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    circuit_rejected INTEGER NOT NULL DEFAULT 0,
    changes_detected INTEGER NOT NULL DEFAULT 0
);

-- Captured page versions, newest last per URL
CREATE TABLE IF NOT EXISTS page_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    raw_content TEXT NOT NULL,
    text_content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_page_versions_url ON page_versions(url, captured_at);

-- Adaptive pacing per domain
CREATE TABLE IF NOT EXISTS domain_rates (
    domain TEXT PRIMARY KEY,
    current_rate_per_minute REAL NOT NULL,
    last_response_time_ms REAL NOT NULL,
    consecutive_successes INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

-- Frontier entries left over at the end of a run, in dispatch order
CREATE TABLE IF NOT EXISTS frontier (
    position INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    priority REAL NOT NULL,
    discovered_from TEXT
);

-- Quality feedback per processed page
CREATE TABLE IF NOT EXISTS page_metadata (
    url TEXT PRIMARY KEY,
    metadata TEXT NOT NULL
);

-- Marks that strategy state has been saved at least once
CREATE TABLE IF NOT EXISTS strategy_saves (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    saved_at TEXT NOT NULL
);
"#;

/// Creates missing tables and stamps the schema version
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

//! SQLite implementation of [`StateStore`]

use crate::change::PageVersion;
use crate::state::DomainRateState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StateStore, StorageError, StorageResult};
use crate::storage::{CrawlStatistics, RunRecord, RunStatus, RunSummary};
use crate::strategy::{FrontierEntry, StrategySnapshot};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite storage backend
///
/// The connection sits behind a mutex; every trait method holds it for the
/// duration of one statement or transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("bad timestamp {:?}: {}", value, e)))
}

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, \
     pages_processed, pages_failed, circuit_rejected, changes_detected";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<(RunRecord, String)> {
    let status: String = row.get(4)?;
    let record = RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::Running,
        summary: RunSummary {
            pages_processed: row.get::<_, i64>(5)?.max(0) as u64,
            pages_failed: row.get::<_, i64>(6)?.max(0) as u64,
            circuit_rejected: row.get::<_, i64>(7)?.max(0) as u64,
            changes_detected: row.get::<_, i64>(8)?.max(0) as u64,
        },
    };
    Ok((record, status))
}

fn with_status((mut record, status): (RunRecord, String)) -> StorageResult<RunRecord> {
    record.status = RunStatus::from_db_string(&status)
        .ok_or_else(|| StorageError::Database(format!("Invalid run status: {}", status)))?;
    Ok(record)
}

fn count(conn: &Connection, sql: &str) -> StorageResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

impl StateStore for SqliteStore {
    // ===== Page Versions =====

    fn load_version_history(&self) -> StorageResult<HashMap<String, Vec<PageVersion>>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT url, content_hash, captured_at, raw_content, text_content, metadata
             FROM page_versions ORDER BY url, captured_at, id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut history: HashMap<String, Vec<PageVersion>> = HashMap::new();
        for row in rows {
            let (url, content_hash, captured_at, raw_content, text_content, metadata) = row?;
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;
            history.entry(url.clone()).or_default().push(PageVersion {
                url,
                content_hash,
                captured_at: parse_timestamp(&captured_at)?,
                raw_content,
                text_content,
                metadata,
            });
        }

        Ok(history)
    }

    fn save_version_history(&self, history: &HashMap<String, Vec<PageVersion>>) -> StorageResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        {
            let mut delete = tx.prepare("DELETE FROM page_versions WHERE url = ?1")?;
            let mut insert = tx.prepare(
                "INSERT INTO page_versions
                 (url, content_hash, captured_at, raw_content, text_content, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for (url, versions) in history {
                delete.execute(params![url])?;
                for version in versions {
                    insert.execute(params![
                        url,
                        version.content_hash,
                        version.captured_at.to_rfc3339(),
                        version.raw_content,
                        version.text_content,
                        serde_json::to_string(&version.metadata)?,
                    ])?;
                }
            }
        }

        tx.commit()?;
        tracing::debug!("Saved version history for {} URLs", history.len());
        Ok(())
    }

    // ===== Rate Limiter State =====

    fn load_rate_states(&self) -> StorageResult<HashMap<String, DomainRateState>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT domain, current_rate_per_minute, last_response_time_ms, consecutive_successes
             FROM domain_rates",
        )?;

        let states = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    DomainRateState {
                        current_rate_per_minute: row.get(1)?,
                        last_response_time_ms: row.get(2)?,
                        consecutive_successes: row.get(3)?,
                        next_allowed_at: None,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(states)
    }

    fn save_rate_states(&self, states: &HashMap<String, DomainRateState>) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        {
            let mut upsert = tx.prepare(
                "INSERT INTO domain_rates
                 (domain, current_rate_per_minute, last_response_time_ms, consecutive_successes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(domain) DO UPDATE SET
                    current_rate_per_minute = excluded.current_rate_per_minute,
                    last_response_time_ms = excluded.last_response_time_ms,
                    consecutive_successes = excluded.consecutive_successes,
                    updated_at = excluded.updated_at",
            )?;

            for (domain, state) in states {
                upsert.execute(params![
                    domain,
                    state.current_rate_per_minute,
                    state.last_response_time_ms,
                    state.consecutive_successes,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // ===== Strategy State =====

    fn load_strategy_state(&self) -> StorageResult<Option<StrategySnapshot>> {
        let conn = self.lock();

        let saved: Option<String> = conn
            .query_row("SELECT saved_at FROM strategy_saves WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        if saved.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT url, depth, priority, discovered_from FROM frontier ORDER BY position",
        )?;
        let frontier = stmt
            .query_map([], |row| {
                Ok(FrontierEntry {
                    url: row.get(0)?,
                    depth: row.get(1)?,
                    priority: row.get(2)?,
                    discovered_from: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT url, metadata FROM page_metadata")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut metadata = HashMap::new();
        for row in rows {
            let (url, json) = row?;
            metadata.insert(url, serde_json::from_str(&json)?);
        }

        Ok(Some(StrategySnapshot { frontier, metadata }))
    }

    fn save_strategy_state(&self, snapshot: &StrategySnapshot) -> StorageResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM frontier", [])?;
        tx.execute("DELETE FROM page_metadata", [])?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO frontier (position, url, depth, priority, discovered_from)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, entry) in snapshot.frontier.iter().enumerate() {
                insert.execute(params![
                    position as i64,
                    entry.url,
                    entry.depth,
                    entry.priority,
                    entry.discovered_from,
                ])?;
            }

            let mut insert = tx.prepare("INSERT INTO page_metadata (url, metadata) VALUES (?1, ?2)")?;
            for (url, metadata) in &snapshot.metadata {
                insert.execute(params![url, serde_json::to_string(metadata)?])?;
            }
        }

        tx.execute(
            "INSERT INTO strategy_saves (id, saved_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET saved_at = excluded.saved_at",
            params![Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ===== Run Management =====

    fn record_run_start(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                Utc::now().to_rfc3339(),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_run_finish(&self, run_id: i64, status: RunStatus, summary: &RunSummary) -> StorageResult<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2, pages_processed = ?3,
                pages_failed = ?4, circuit_rejected = ?5, changes_detected = ?6
             WHERE id = ?7",
            params![
                Utc::now().to_rfc3339(),
                status.to_db_string(),
                summary.pages_processed as i64,
                summary.pages_failed as i64,
                summary.circuit_rejected as i64,
                summary.changes_detected as i64,
                run_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))?;

        with_status(row)
    }

    fn load_statistics(&self) -> StorageResult<CrawlStatistics> {
        let conn = self.lock();

        let mut runs_by_status = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM runs GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, n) = row?;
                if let Some(status) = RunStatus::from_db_string(&status) {
                    runs_by_status.insert(status, n.max(0) as u64);
                }
            }
        }

        let last_run = conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?
            .map(with_status)
            .transpose()?;

        Ok(CrawlStatistics {
            total_runs: count(&conn, "SELECT COUNT(*) FROM runs")?,
            runs_by_status,
            last_run,
            tracked_urls: count(&conn, "SELECT COUNT(DISTINCT url) FROM page_versions")?,
            stored_versions: count(&conn, "SELECT COUNT(*) FROM page_versions")?,
            rate_limited_domains: count(&conn, "SELECT COUNT(*) FROM domain_rates")?,
            frontier_size: count(&conn, "SELECT COUNT(*) FROM frontier")?,
        })
    }
}

//! Storage module for persisting crawl state between runs
//!
//! This module handles:
//! - Page version history for change detection
//! - Per-domain rate limiter state
//! - The leftover frontier and page quality feedback
//! - Run bookkeeping and aggregate statistics

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{StateStore, StorageError, StorageResult};

use std::collections::HashMap;
use std::path::Path;

/// Opens or creates the SQLite store at `path`
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// A crawl run as stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub summary: RunSummary,
}

/// Counts stored with a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_processed: u64,
    pub pages_failed: u64,
    pub circuit_rejected: u64,
    pub changes_detected: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Aggregate view over everything stored
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    pub total_runs: u64,
    pub runs_by_status: HashMap<RunStatus, u64>,
    pub last_run: Option<RunRecord>,
    pub tracked_urls: u64,
    pub stored_versions: u64,
    pub rate_limited_domains: u64,
    pub frontier_size: u64,
}

//! Persistence interface and error types
//!
//! The crawl engine reads state once when a run starts and writes it once when
//! the run ends; nothing here is called on the per-URL hot path.

use crate::change::PageVersion;
use crate::state::DomainRateState;
use crate::storage::{CrawlStatistics, RunRecord, RunStatus, RunSummary};
use crate::strategy::StrategySnapshot;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence collaborator for crawl-run boundaries
///
/// Implementations must be usable from several tasks at once.
pub trait StateStore: Send + Sync {
    /// Version history per URL, oldest first
    fn load_version_history(&self) -> StorageResult<HashMap<String, Vec<PageVersion>>>;

    /// Replaces the stored history of every URL in the map
    fn save_version_history(&self, history: &HashMap<String, Vec<PageVersion>>) -> StorageResult<()>;

    fn load_rate_states(&self) -> StorageResult<HashMap<String, DomainRateState>>;

    fn save_rate_states(&self, states: &HashMap<String, DomainRateState>) -> StorageResult<()>;

    /// Saved frontier and page feedback; `None` before the first save
    fn load_strategy_state(&self) -> StorageResult<Option<StrategySnapshot>>;

    fn save_strategy_state(&self, snapshot: &StrategySnapshot) -> StorageResult<()>;

    /// Records the start of a run and returns its id
    fn record_run_start(&self, config_hash: &str) -> StorageResult<i64>;

    fn record_run_finish(&self, run_id: i64, status: RunStatus, summary: &RunSummary) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn load_statistics(&self) -> StorageResult<CrawlStatistics>;
}

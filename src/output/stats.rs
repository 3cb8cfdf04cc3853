//! Statistics from the crawl database
//!
//! This module renders the [`CrawlStatistics`] loaded through the
//! persistence collaborator.

use crate::storage::{CrawlStatistics, RunStatus};
use std::fmt::Write;

/// Renders stored statistics as plain text
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Crawl Statistics ===\n");

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Total runs: {}", stats.total_runs);
    let _ = writeln!(out, "  Tracked URLs: {}", stats.tracked_urls);
    let _ = writeln!(out, "  Stored versions: {}", stats.stored_versions);
    let _ = writeln!(out, "  Domains with rate state: {}", stats.rate_limited_domains);
    let _ = writeln!(out, "  Frontier entries: {}", stats.frontier_size);
    let _ = writeln!(out);

    if !stats.runs_by_status.is_empty() {
        let _ = writeln!(out, "Runs by Status:");
        for status in [
            RunStatus::Completed,
            RunStatus::Cancelled,
            RunStatus::Failed,
            RunStatus::Running,
        ] {
            if let Some(count) = stats.runs_by_status.get(&status) {
                let _ = writeln!(out, "  {}: {}", status.to_db_string(), count);
            }
        }
        let _ = writeln!(out);
    }

    match &stats.last_run {
        Some(run) => {
            let _ = writeln!(out, "Last Run ({}):", run.id);
            let _ = writeln!(out, "  Started: {}", run.started_at);
            let _ = writeln!(
                out,
                "  Finished: {}",
                run.finished_at.as_deref().unwrap_or("-")
            );
            let _ = writeln!(out, "  Status: {}", run.status.to_db_string());
            let _ = writeln!(out, "  Processed: {}", run.summary.pages_processed);
            let _ = writeln!(out, "  Failed: {}", run.summary.pages_failed);
            let _ = writeln!(out, "  Circuit rejected: {}", run.summary.circuit_rejected);
            let _ = write!(out, "  Changes: {}", run.summary.changes_detected);
        }
        None => {
            let _ = write!(out, "No runs recorded yet");
        }
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("{}", format_statistics(stats));
}

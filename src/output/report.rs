//! Summary of a finished crawl run

use crate::crawler::CrawlReport;
use std::fmt::Write;

/// Renders a run report as plain text
pub fn format_report(report: &CrawlReport) -> String {
    let mut out = String::new();

    let title = match report.run_id {
        Some(id) => format!("=== Crawl Run {} ===", id),
        None => "=== Crawl Run ===".to_string(),
    };
    let _ = writeln!(out, "{}\n", title);

    let _ = writeln!(out, "Results:");
    let _ = writeln!(out, "  Processed: {}", report.pages_processed);
    let _ = writeln!(out, "  Failed: {}", report.pages_failed);
    let _ = writeln!(out, "  Timed out: {}", report.timed_out);
    let _ = writeln!(out, "  Circuit rejected: {}", report.circuit_rejected);
    let _ = writeln!(out, "  Skipped by robots.txt: {}", report.skipped_by_robots);
    if report.cancelled > 0 {
        let _ = writeln!(out, "  Cancelled: {}", report.cancelled);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Changes:");
    let _ = writeln!(out, "  New pages: {}", report.pages_added);
    let _ = writeln!(out, "  Changed pages: {}", report.changes_detected);
    let _ = writeln!(out, "  Notifications dispatched: {}", report.notifications_dispatched);
    let _ = writeln!(out);

    if !report.failures_by_status.is_empty() {
        let _ = writeln!(out, "Failures by Status:");
        for (status, count) in &report.failures_by_status {
            if *status == 0 {
                let _ = writeln!(out, "  no response: {}", count);
            } else {
                let _ = writeln!(out, "  HTTP {}: {}", status, count);
            }
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Links discovered: {}", report.links_discovered);
    let _ = writeln!(out, "Left in frontier: {}", report.frontier_remaining);
    let _ = write!(
        out,
        "Duration: {:.1}s{}",
        report.duration.as_secs_f64(),
        if report.was_cancelled { " (cancelled)" } else { "" }
    );

    out
}

/// Prints a run report to stdout
pub fn print_report(report: &CrawlReport) {
    println!("{}", format_report(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_format_report() {
        let report = CrawlReport {
            run_id: Some(7),
            pages_processed: 12,
            pages_failed: 2,
            circuit_rejected: 3,
            changes_detected: 1,
            failures_by_status: BTreeMap::from([(0, 1), (404, 1)]),
            was_cancelled: true,
            duration: Duration::from_millis(1500),
            ..Default::default()
        };

        let text = format_report(&report);
        assert!(text.starts_with("=== Crawl Run 7 ==="));
        assert!(text.contains("Processed: 12"));
        assert!(text.contains("Circuit rejected: 3"));
        assert!(text.contains("HTTP 404: 1"));
        assert!(text.contains("no response: 1"));
        assert!(text.ends_with("Duration: 1.5s (cancelled)"));
        assert!(!text.contains("Cancelled:"));
    }
}

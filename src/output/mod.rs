//! Console output for crawl runs and stored statistics
//!
//! This module handles:
//! - Rendering the aggregate counts of a finished run
//! - Rendering statistics loaded from the persistence collaborator

mod report;
pub mod stats;

pub use report::{format_report, print_report};
pub use stats::{format_statistics, print_statistics};

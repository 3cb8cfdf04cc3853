//! Configuration module for Sumi-Tide
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The orchestrator reads the resulting [`Config`] once at start.
//!
//! # Example
//!
//! ```no_run
//! use sumi_tide::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Workers: {}", config.crawler.worker_count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChangeDetectionConfig, CircuitBreakerConfig, Config, CrawlerConfig, OutputConfig,
    RateLimitConfig, RetryConfig, SiteEntry, StrategyConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;

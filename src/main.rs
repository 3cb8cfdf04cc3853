//! Sumi-Tide main entry point
//!
//! This is the command-line interface for the Sumi-Tide change-tracking crawler.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_tide::config::{load_config_with_hash, Config};
use sumi_tide::crawler::{Component, Coordinator};
use sumi_tide::output::{print_report, print_statistics};
use sumi_tide::storage::{open_store, StateStore};
use tracing_subscriber::EnvFilter;

/// Sumi-Tide: a polite change-tracking crawler
///
/// Sumi-Tide crawls the configured sites with adaptive per-domain pacing and
/// circuit breaking, versions every page it fetches, and reports what changed
/// since the previous run.
#[derive(Parser, Debug)]
#[command(name = "sumi-tide")]
#[command(version)]
#[command(about = "A polite change-tracking crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "continuous"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "continuous"])]
    stats: bool,

    /// Keep crawling, one run every continuous-interval-secs, until Ctrl-C
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    continuous: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, config_hash, cli.continuous).await?;
    }

    Ok(())
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_tide=info,warn"),
            1 => EnvFilter::new("sumi_tide=debug,info"),
            2 => EnvFilter::new("sumi_tide=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: shows the effective configuration and seeds
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Tide Dry Run ===\n");

    println!("Crawler:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Workers: {}", config.crawler.worker_count);
    println!("  Queue capacity: {}", config.crawler.queue_capacity);
    println!("  Per-item timeout: {}ms", config.crawler.per_item_timeout_ms);
    if config.crawler.max_pages > 0 {
        println!("  Max pages per run: {}", config.crawler.max_pages);
    }
    println!("  External links: {}", config.crawler.allow_external_links);
    println!("  Respect robots.txt: {}", config.crawler.respect_robots);

    println!("\nRate Limit:");
    println!(
        "  Initial rate: {}/min",
        config.rate_limit.initial_requests_per_minute
    );
    println!(
        "  Delay bounds: {}ms..{}ms",
        config.rate_limit.min_delay_ms, config.rate_limit.max_delay_ms
    );
    println!(
        "  Circuit: opens after {} failures for {}ms",
        config.circuit_breaker.failure_threshold, config.circuit_breaker.reset_timeout_ms
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.output.database_path);

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        println!(
            "  - {} (priority {}, {} seeds)",
            site.domain,
            site.priority,
            site.seeds.len()
        );
        for seed in &site.seeds {
            println!("    * {}", seed);
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling with {} seed URLs",
        config.seeds().count()
    );
}

/// Handles --stats: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))
        .context("failed to open database")?;
    let stats = store.load_statistics()?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the crawl itself, once or continuously
async fn handle_crawl(config: Config, config_hash: String, continuous: bool) -> anyhow::Result<()> {
    let store = open_store(Path::new(&config.output.database_path))
        .context("failed to open database")?;

    tracing::info!(
        "Sites: {}, seed URLs: {}",
        config.sites.len(),
        config.seeds().count()
    );

    let mut coordinator = Coordinator::from_config(config)?.with_config_hash(config_hash);
    coordinator.register(Component::Persistence(Arc::new(store)))?;
    coordinator.initialize().await?;

    let token = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            token.cancel();
        }
    });

    let outcome = if continuous {
        coordinator
            .run_continuous(print_report)
            .await
            .map(|runs| tracing::info!("Completed {} crawl runs", runs))
    } else {
        coordinator.run().await.map(|report| print_report(&report))
    };

    coordinator.shutdown().await?;
    outcome?;
    Ok(())
}

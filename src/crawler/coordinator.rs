//! Crawler coordinator - main crawl orchestration logic
//!
//! The coordinator owns the crawl engine and drives its lifecycle:
//! - `new`: validate configuration and build the engine (fails fast)
//! - `initialize`: resolve registered collaborators and load persisted state
//! - `run` / `run_continuous`: feed the frontier into the processing pipeline
//!   and collect one result per dispatched URL
//! - `stop`: cancel the current run
//! - `shutdown`: cancel and persist state

use crate::change::ContentChangeDetector;
use crate::config::{validate, Config};
use crate::crawler::page_processor::{PageProcessor, RunCounters};
use crate::crawler::registry::{Capability, Component, ComponentRegistry, Components};
use crate::crawler::{Fetcher, HttpFetcher};
use crate::pipeline::{PipelineConfig, ProcessingPipeline, ProcessingResult, Received, ResultKind};
use crate::robots::{AllowAll, RobotsPolicy, RobotsTxtPolicy};
use crate::storage::{RunStatus, RunSummary};
use crate::strategy::{AdaptiveCrawlStrategy, FrontierEntry};
use crate::throttle::{AdaptiveRateLimiter, CircuitBreaker, RetryPolicy};
use crate::url::DomainAllowList;
use crate::TideError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long the crawl loop waits for a result before dispatching again
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Results between progress log lines
const PROGRESS_EVERY: u64 = 10;

/// Aggregate counts for one crawl run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    pub run_id: Option<i64>,
    pub pages_processed: u64,
    pub pages_failed: u64,
    pub timed_out: u64,
    pub circuit_rejected: u64,
    pub skipped_by_robots: u64,
    pub cancelled: u64,
    /// First captures of a URL
    pub pages_added: u64,
    /// Modifications and removals
    pub changes_detected: u64,
    /// Notifications handed to the notifier; delivery failures are only logged
    pub notifications_dispatched: u64,
    pub links_discovered: u64,
    /// Entries left in the frontier when the run ended
    pub frontier_remaining: usize,
    /// Failed results by HTTP status; 0 collects failures without a status
    pub failures_by_status: BTreeMap<u16, u64>,
    pub was_cancelled: bool,
    pub duration: Duration,
}

impl CrawlReport {
    /// Counts one pipeline result
    pub fn record(&mut self, result: &ProcessingResult) {
        match result.kind {
            ResultKind::Processed => self.pages_processed += 1,
            ResultKind::Failed => {
                self.pages_failed += 1;
                *self
                    .failures_by_status
                    .entry(result.status_code.unwrap_or(0))
                    .or_default() += 1;
            }
            ResultKind::TimedOut => self.timed_out += 1,
            ResultKind::CircuitRejected => self.circuit_rejected += 1,
            ResultKind::Skipped => self.skipped_by_robots += 1,
            ResultKind::Cancelled => self.cancelled += 1,
        }
    }

    /// Results received, whatever their kind
    pub fn total(&self) -> u64 {
        self.pages_processed
            + self.pages_failed
            + self.timed_out
            + self.circuit_rejected
            + self.skipped_by_robots
            + self.cancelled
    }

    /// Counts stored with the run record
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            pages_processed: self.pages_processed,
            pages_failed: self.pages_failed + self.timed_out,
            circuit_rejected: self.circuit_rejected,
            changes_detected: self.changes_detected,
        }
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    fetcher: Arc<dyn Fetcher>,
    registry: ComponentRegistry,
    components: Components,
    robots: Arc<dyn RobotsPolicy>,
    limiter: Arc<AdaptiveRateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    detector: Arc<ContentChangeDetector>,
    strategy: Arc<AdaptiveCrawlStrategy>,
    token: CancellationToken,
    initialized: bool,
}

impl Coordinator {
    /// Creates a coordinator that fetches through `fetcher`
    ///
    /// # Arguments
    ///
    /// * `config` - Crawl configuration; validated before anything is built
    /// * `fetcher` - Transport used for pages and robots.txt
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready for `register` and `initialize`
    /// * `Err(TideError::Config)` - The configuration is invalid
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>) -> crate::Result<Self> {
        validate(&config)?;

        let allow_list = DomainAllowList::new(
            config.allowed_domains(),
            config.crawler.allow_external_links,
        );
        let strategy = AdaptiveCrawlStrategy::new(
            allow_list,
            config.crawler.max_depth,
            config.strategy.clone(),
        );

        Ok(Self {
            limiter: Arc::new(
                AdaptiveRateLimiter::new(config.rate_limit.clone())
                    .with_max_deferral(Duration::from_secs(config.retry.max_retry_after_secs)),
            ),
            breaker: Arc::new(CircuitBreaker::from_config(&config.circuit_breaker)),
            retry: RetryPolicy::from_config(&config.retry),
            detector: Arc::new(ContentChangeDetector::new(
                config.change_detection.retention_count,
            )),
            strategy: Arc::new(strategy),
            config: Arc::new(config),
            config_hash: String::new(),
            fetcher,
            registry: ComponentRegistry::new(),
            components: Components::default(),
            robots: Arc::new(AllowAll),
            token: CancellationToken::new(),
            initialized: false,
        })
    }

    /// Creates a coordinator with the reqwest fetcher built from the config
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Coordinator fetching over HTTP
    /// * `Err(TideError::Config)` - The configuration is invalid
    /// * `Err(TideError::Reqwest)` - The HTTP client could not be built
    pub fn from_config(config: Config) -> crate::Result<Self> {
        let fetcher = HttpFetcher::from_config(&config.user_agent, config.crawler.per_item_timeout())?;
        Self::new(config, Arc::new(fetcher))
    }

    /// Sets the hash stored with each run record
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Registers an optional collaborator; only allowed before `initialize`
    ///
    /// # Arguments
    ///
    /// * `component` - Collaborator to register; a later registration of the
    ///   same capability replaces an earlier one
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Registered
    /// * `Err(TideError::Initialization)` - The coordinator is already initialized
    pub fn register(&mut self, component: Component) -> crate::Result<()> {
        if self.initialized {
            return Err(TideError::Initialization(format!(
                "cannot register {} after initialization",
                component.capability()
            )));
        }
        self.registry.register(component);
        Ok(())
    }

    /// Resolves collaborators and loads persisted state
    ///
    /// Without a registered robots policy, robots.txt is honoured through the
    /// coordinator's fetcher when `respect-robots` is set.
    pub async fn initialize(&mut self) -> crate::Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.components = self.registry.resolve();
        self.robots = match &self.components.robots {
            Some(policy) => Arc::clone(policy),
            None if self.config.crawler.respect_robots => Arc::new(RobotsTxtPolicy::new(
                Arc::clone(&self.fetcher),
                self.config.user_agent.crawler_name.clone(),
            )),
            None => Arc::new(AllowAll),
        };

        if let Some(store) = &self.components.store {
            let history = store.load_version_history()?;
            tracing::info!("Loaded version history for {} URLs", history.len());
            self.detector.load_history(history);

            let rates = store.load_rate_states()?;
            tracing::debug!("Loaded rate state for {} domains", rates.len());
            self.limiter.restore(rates);

            if let Some(snapshot) = store.load_strategy_state()? {
                tracing::info!("Restoring {} frontier entries", snapshot.frontier.len());
                self.strategy.restore(snapshot);
            }
        }

        let capabilities: Vec<String> = self
            .registry
            .capabilities()
            .iter()
            .map(Capability::to_string)
            .collect();
        tracing::info!(
            "Coordinator initialized (capabilities: [{}])",
            capabilities.join(", ")
        );

        self.initialized = true;
        Ok(())
    }

    /// Runs one crawl over the configured seeds and everything they lead to
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - The run started; also returned when it is
    ///   cancelled part-way
    /// * `Err(TideError::Initialization)` - Not initialized, or the pipeline
    ///   could not be built; no run is recorded
    /// * `Err(TideError::Storage)` - The run record could not be written
    pub async fn run(&self) -> crate::Result<CrawlReport> {
        if !self.initialized {
            return Err(TideError::Initialization(
                "coordinator must be initialized before running".to_string(),
            ));
        }

        let started = Instant::now();
        let counters = Arc::new(RunCounters::default());
        let processor = PageProcessor {
            fetcher: Arc::clone(&self.fetcher),
            limiter: Arc::clone(&self.limiter),
            breaker: Arc::clone(&self.breaker),
            retry: self.retry.clone(),
            max_retry_after: Duration::from_secs(self.config.retry.max_retry_after_secs),
            item_budget: self.config.crawler.per_item_timeout(),
            detector: Arc::clone(&self.detector),
            strategy: Arc::clone(&self.strategy),
            robots: Arc::clone(&self.robots),
            components: self.components.clone(),
            notify_threshold_percent: self.config.change_detection.notify_threshold_percent,
            counters: Arc::clone(&counters),
        };

        let pipeline = ProcessingPipeline::new(
            PipelineConfig::from_crawler_config(&self.config.crawler),
            Arc::new(processor),
            self.token.child_token(),
        )?;

        let run_id = match &self.components.store {
            Some(store) => Some(store.record_run_start(&self.config_hash)?),
            None => None,
        };
        tracing::info!("Starting crawl run {}", run_id.map_or("-".to_string(), |id| id.to_string()));

        self.strategy.begin_run();
        let seeded = self
            .config
            .seeds()
            .filter(|(seed, priority)| self.strategy.add_seed(seed, *priority))
            .count();
        tracing::debug!("Seeded {} URLs, frontier holds {}", seeded, self.strategy.len());

        let mut report = self.drive(&pipeline).await;
        pipeline.join().await;

        report.run_id = run_id;
        report.pages_added = counters.pages_added.load(Ordering::Relaxed);
        report.changes_detected = counters.changes_detected.load(Ordering::Relaxed);
        report.notifications_dispatched = counters.notifications_dispatched.load(Ordering::Relaxed);
        report.links_discovered = counters.links_discovered.load(Ordering::Relaxed);
        report.frontier_remaining = self.strategy.len();
        report.was_cancelled = self.token.is_cancelled();
        report.duration = started.elapsed();

        self.finish_run(&report);

        tracing::info!(
            "Crawl finished: {} processed, {} failed, {} circuit rejected, {} changes in {:?}",
            report.pages_processed,
            report.pages_failed + report.timed_out,
            report.circuit_rejected,
            report.changes_detected,
            report.duration
        );

        Ok(report)
    }

    /// Dispatch/collect loop for one run
    async fn drive(&self, pipeline: &ProcessingPipeline<FrontierEntry>) -> CrawlReport {
        let max_pages = self.config.crawler.max_pages;
        let mut report = CrawlReport::default();
        let mut in_flight: HashMap<String, FrontierEntry> = HashMap::new();
        let mut pending: Option<FrontierEntry> = None;
        let mut dispatched = 0usize;

        loop {
            let cancelled = self.token.is_cancelled();

            if !cancelled {
                while max_pages == 0 || dispatched < max_pages {
                    let Some(entry) = pending.take().or_else(|| self.strategy.get_next_url()) else {
                        break;
                    };
                    let key = entry.url.clone();
                    match pipeline.offer(entry.clone()) {
                        Ok(()) => {
                            in_flight.insert(key, entry);
                            dispatched += 1;
                        }
                        Err(refused) => {
                            pending = Some(refused);
                            break;
                        }
                    }
                }
            }

            let nothing_to_dispatch = cancelled
                || (pending.is_none()
                    && (self.strategy.is_empty() || (max_pages > 0 && dispatched >= max_pages)));
            if nothing_to_dispatch && in_flight.is_empty() && !pipeline.is_completed() {
                pipeline.complete();
            }

            match pipeline.try_receive(RESULT_POLL_INTERVAL).await {
                Received::Result(result) => {
                    if let Some(entry) = in_flight.remove(&result.url) {
                        if result.kind == ResultKind::Cancelled {
                            self.strategy.requeue(entry);
                        }
                    }
                    report.record(&result);

                    if report.total() % PROGRESS_EVERY == 0 {
                        tracing::info!(
                            "Progress: {} results, {} in flight, {} in frontier",
                            report.total(),
                            in_flight.len(),
                            self.strategy.len()
                        );
                    }
                }
                Received::Empty => {}
                Received::Closed => break,
            }
        }

        if let Some(entry) = pending {
            self.strategy.requeue(entry);
        }
        // Results lost to a worker abort leave their entries here
        for (_, entry) in in_flight {
            self.strategy.requeue(entry);
        }

        report
    }

    /// Records the run outcome and persists state; failures are logged only
    fn finish_run(&self, report: &CrawlReport) {
        let Some(store) = &self.components.store else {
            return;
        };

        if let Some(run_id) = report.run_id {
            let status = if report.was_cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            };
            if let Err(e) = store.record_run_finish(run_id, status, &report.summary()) {
                tracing::error!("Failed to record end of run {}: {}", run_id, e);
            }
        }

        if let Err(e) = self.persist_state() {
            tracing::error!("Failed to persist crawl state: {}", e);
        }
    }

    /// Runs repeatedly, `continuous-interval-secs` apart, until cancelled
    ///
    /// # Arguments
    ///
    /// * `on_report` - Called with the report of each finished run
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of runs completed before cancellation
    /// * `Err(TideError)` - A run failed to start
    pub async fn run_continuous<F>(&self, mut on_report: F) -> crate::Result<u64>
    where
        F: FnMut(&CrawlReport),
    {
        let interval = self.config.crawler.continuous_interval();
        let mut runs = 0;

        while !self.token.is_cancelled() {
            let report = self.run().await?;
            runs += 1;
            on_report(&report);

            tracing::info!("Next crawl run in {:?}", interval);
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Continuous crawling stopped after {} runs", runs);
        Ok(runs)
    }

    /// Cancels the current run; in-flight pages finish or time out
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Stopping crawl");
            self.token.cancel();
        }
    }

    /// Stops crawling and saves state through the persistence collaborator
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.stop();
        self.persist_state()?;
        tracing::info!("Coordinator shut down");
        Ok(())
    }

    fn persist_state(&self) -> crate::Result<()> {
        let Some(store) = &self.components.store else {
            return Ok(());
        };

        store.save_version_history(&self.detector.export_history())?;
        store.save_rate_states(&self.limiter.snapshot())?;
        store.save_strategy_state(&self.strategy.snapshot())?;
        tracing::debug!("Crawl state saved");
        Ok(())
    }

    /// Token that cancels this coordinator's runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn rate_limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn change_detector(&self) -> &ContentChangeDetector {
        &self.detector
    }

    pub fn strategy(&self) -> &AdaptiveCrawlStrategy {
        &self.strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::registry::ChangeNotifier;
    use crate::crawler::FetchResponse;
    use crate::ChangeResult;
    use crate::storage::{SqliteStore, StateStore};
    use crate::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Serves fixed pages from memory and records every request
    struct PageMap {
        pages: HashMap<String, (u16, String)>,
        requests: Mutex<Vec<String>>,
    }

    impl PageMap {
        fn new(pages: &[(&str, u16, &str)]) -> Arc<Self> {
            Arc::new(Self {
                pages: pages
                    .iter()
                    .map(|(url, status, body)| (url.to_string(), (*status, body.to_string())))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests_for(&self, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.as_str() == url)
                .count()
        }
    }

    #[async_trait]
    impl Fetcher for PageMap {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            let (status, body) = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(FetchResponse {
                url: url.to_string(),
                status_code: status,
                body: body.into_bytes(),
                content_type: Some("text/html".to_string()),
                retry_after: None,
                elapsed: Duration::from_millis(5),
            })
        }
    }

    fn config(extra: &str) -> Config {
        parse_config(&format!(
            r#"
[crawler]
respect-robots = false
metrics-interval-ms = 1000
{extra}

[rate-limit]
initial-requests-per-minute = 6000
min-delay-ms = 1

[retry]
max-attempts = 1

[user-agent]
crawler-name = "TideBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "bot@example.com"

[output]
database-path = "unused.db"

[[site]]
domain = "site.test"
seeds = ["https://site.test/"]
"#
        ))
        .unwrap()
    }

    fn site() -> Arc<PageMap> {
        PageMap::new(&[
            (
                "https://site.test/",
                200,
                r#"<html><head><title>Home</title></head><body><p>Welcome</p>
                <a href="/a">A</a><a href="/b">B</a><a href="https://elsewhere.test/">X</a></body></html>"#,
            ),
            (
                "https://site.test/a",
                200,
                r#"<html><body><p>Page A</p><a href="/">home</a></body></html>"#,
            ),
            ("https://site.test/b", 200, "<html><body><p>Page B</p></body></html>"),
        ])
    }

    #[tokio::test]
    async fn test_run_requires_initialize() {
        let coordinator = Coordinator::new(config(""), site()).unwrap();
        assert!(matches!(
            coordinator.run().await,
            Err(TideError::Initialization(_))
        ));
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut bad = config("");
        bad.crawler.worker_count = 0;
        assert!(matches!(
            Coordinator::new(bad, site()),
            Err(TideError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_crawls_each_page_once() {
        let fetcher = site();
        let mut coordinator = Coordinator::new(config(""), fetcher.clone()).unwrap();
        coordinator.initialize().await.unwrap();

        let report = coordinator.run().await.unwrap();

        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.pages_added, 3);
        assert_eq!(report.pages_failed, 0);
        assert!(!report.was_cancelled);
        assert_eq!(fetcher.requests_for("https://site.test/"), 1);
        assert_eq!(fetcher.requests_for("https://elsewhere.test/"), 0);
        assert_eq!(coordinator.change_detector().tracked_urls().len(), 3);
        assert!(coordinator.strategy().is_empty());
    }

    #[tokio::test]
    async fn test_client_errors_are_counted_by_status() {
        let fetcher = PageMap::new(&[(
            "https://site.test/",
            200,
            r#"<body><a href="/missing">gone</a></body>"#,
        )]);
        let mut coordinator = Coordinator::new(config(""), fetcher).unwrap();
        coordinator.initialize().await.unwrap();

        let report = coordinator.run().await.unwrap();

        assert_eq!(report.pages_processed, 1);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.failures_by_status.get(&404), Some(&1));
        assert_eq!(
            coordinator.circuit_breaker().failure_count("site.test"),
            0
        );
    }

    #[tokio::test]
    async fn test_max_pages_leaves_rest_in_frontier() {
        let mut coordinator = Coordinator::new(config("max-pages = 1"), site()).unwrap();
        coordinator.initialize().await.unwrap();

        let report = coordinator.run().await.unwrap();

        assert_eq!(report.total(), 1);
        assert_eq!(report.frontier_remaining, 2);
    }

    #[tokio::test]
    async fn test_second_run_sees_no_changes() {
        let mut coordinator = Coordinator::new(config(""), site()).unwrap();
        coordinator.initialize().await.unwrap();

        coordinator.run().await.unwrap();
        let second = coordinator.run().await.unwrap();

        assert_eq!(second.pages_processed, 3);
        assert_eq!(second.pages_added, 0);
        assert_eq!(second.changes_detected, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let fetcher = site();
        let mut coordinator = Coordinator::new(config(""), fetcher.clone()).unwrap();
        coordinator.initialize().await.unwrap();
        coordinator.stop();

        let report = coordinator.run().await.unwrap();

        assert!(report.was_cancelled);
        assert_eq!(report.total(), 0);
        assert_eq!(report.frontier_remaining, 1);
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_is_persisted_and_restored() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());

        let mut first = Coordinator::new(config(""), site())
            .unwrap()
            .with_config_hash("abc");
        first
            .register(Component::Persistence(store.clone()))
            .unwrap();
        first.initialize().await.unwrap();
        let report = first.run().await.unwrap();
        first.shutdown().await.unwrap();

        let run = store.get_run(report.run_id.unwrap()).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.summary.pages_processed, 3);
        assert_eq!(run.config_hash, "abc");

        let mut second = Coordinator::new(config(""), site()).unwrap();
        second
            .register(Component::Persistence(store.clone()))
            .unwrap();
        second.initialize().await.unwrap();
        assert_eq!(second.change_detector().tracked_urls().len(), 3);
        assert!(second.rate_limiter().current_rate("site.test").is_some());

        let report = second.run().await.unwrap();
        assert_eq!(report.pages_added, 0);
        assert_eq!(report.changes_detected, 0);
    }

    #[tokio::test]
    async fn test_register_after_initialize_fails() {
        let mut coordinator = Coordinator::new(config(""), site()).unwrap();
        coordinator.initialize().await.unwrap();

        let store = SqliteStore::new_in_memory().unwrap();
        assert!(coordinator
            .register(Component::Persistence(Arc::new(store)))
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continuous_stops_on_cancel() {
        let mut coordinator = Coordinator::new(config("continuous-interval-secs = 60"), site()).unwrap();
        coordinator.initialize().await.unwrap();
        let token = coordinator.cancellation_token();

        let mut reports = Vec::new();
        let runs = tokio::select! {
            runs = coordinator.run_continuous(|report| reports.push(report.pages_processed)) => runs.unwrap(),
            _ = async {
                tokio::time::sleep(Duration::from_secs(90)).await;
                token.cancel();
                std::future::pending::<()>().await;
            } => unreachable!(),
        };

        assert_eq!(runs, 2);
        assert_eq!(reports, vec![3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_pacing_does_not_time_out_items() {
        let mut cfg = config("worker-count = 3\nper-item-timeout-ms = 2000");
        cfg.rate_limit.initial_requests_per_minute = 6.0;
        cfg.rate_limit.max_delay_ms = 60_000;

        let fetcher = site();
        let mut coordinator = Coordinator::new(cfg, fetcher.clone()).unwrap();
        coordinator.initialize().await.unwrap();

        let report = coordinator.run().await.unwrap();

        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.pages_failed, 0);
        assert_eq!(
            coordinator.circuit_breaker().failure_count("site.test"),
            0
        );
        assert_eq!(fetcher.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_when_no_slot_fits_before_deadline() {
        let mut cfg = config("per-item-timeout-ms = 2000");
        cfg.rate_limit.initial_requests_per_minute = 6.0;
        cfg.retry.max_attempts = 3;
        cfg.retry.base_delay_ms = 500;

        let fetcher = PageMap::new(&[("https://site.test/", 503, "busy")]);
        let mut coordinator = Coordinator::new(cfg, fetcher.clone()).unwrap();
        coordinator.initialize().await.unwrap();

        let report = coordinator.run().await.unwrap();

        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.failures_by_status.get(&503), Some(&1));
        assert_eq!(fetcher.requests_for("https://site.test/"), 1);
        assert_eq!(
            coordinator.circuit_breaker().failure_count("site.test"),
            1
        );
    }

    /// Serves a single page whose text changes on every fetch
    struct Edition {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for Edition {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse {
                url: url.to_string(),
                status_code: 200,
                body: format!("<html><body><p>Edition number {}</p></body></html>", n).into_bytes(),
                content_type: Some("text/html".to_string()),
                retry_after: None,
                elapsed: Duration::from_millis(5),
            })
        }
    }

    struct BrokenWebhook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChangeNotifier for BrokenWebhook {
        async fn notify(&self, _url: &str, _change: &ChangeResult) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TideError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "webhook down",
            )))
        }
    }

    #[tokio::test]
    async fn test_failed_notification_is_still_counted_as_dispatched() {
        let fetcher = Arc::new(Edition {
            fetches: AtomicUsize::new(0),
        });
        let webhook = Arc::new(BrokenWebhook {
            calls: AtomicUsize::new(0),
        });
        let mut coordinator = Coordinator::new(config(""), fetcher).unwrap();
        coordinator
            .register(Component::Notification(webhook.clone()))
            .unwrap();
        coordinator.initialize().await.unwrap();

        let first = coordinator.run().await.unwrap();
        assert_eq!(first.pages_added, 1);
        assert_eq!(first.notifications_dispatched, 0);

        let second = coordinator.run().await.unwrap();
        assert_eq!(second.changes_detected, 1);
        assert_eq!(second.notifications_dispatched, 1);
        assert_eq!(second.pages_processed, 1);
        assert_eq!(second.pages_failed, 0);

        for _ in 0..100 {
            if webhook.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(webhook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_that_cannot_start_is_not_recorded() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let mut coordinator = Coordinator::new(config(""), site()).unwrap();
        coordinator
            .register(Component::Persistence(store.clone()))
            .unwrap();
        coordinator.initialize().await.unwrap();

        let mut broken = config("");
        broken.crawler.queue_capacity = 0;
        coordinator.config = Arc::new(broken);

        assert!(coordinator.run().await.is_err());
        assert_eq!(store.load_statistics().unwrap().total_runs, 0);
    }

    #[test]
    fn test_report_record() {
        let mut report = CrawlReport::default();
        report.record(&ProcessingResult::failed("https://a.test/", "boom", Some(503), 1));
        report.record(&ProcessingResult::failed("https://a.test/x", "boom", None, 1));
        report.record(&ProcessingResult::timed_out("https://a.test/y", 10));
        report.record(&ProcessingResult::cancelled("https://a.test/z"));

        assert_eq!(report.total(), 4);
        assert_eq!(report.failures_by_status[&503], 1);
        assert_eq!(report.failures_by_status[&0], 1);
        assert_eq!(report.summary().pages_failed, 3);
    }
}

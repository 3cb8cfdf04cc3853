//! Per-URL work done by pipeline workers

use crate::change::{ChangeType, ContentChangeDetector};
use crate::crawler::registry::Components;
use crate::crawler::{parse_html, FetchResponse, Fetcher, ParsedPage};
use crate::pipeline::{ItemOutcome, ItemProcessor};
use crate::robots::RobotsPolicy;
use crate::strategy::{quality_score, AdaptiveCrawlStrategy, FrontierEntry, PageMetadata};
use crate::state::CircuitState;
use crate::throttle::{transient_only, AdaptiveRateLimiter, CircuitBreaker, Execution, RetryDecision, RetryPolicy};
use crate::url::domain_of;
use crate::{FetchError, TideError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Counters the processor bumps during a run
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub pages_added: AtomicU64,
    pub changes_detected: AtomicU64,
    pub links_discovered: AtomicU64,
    /// Notifications handed to the notifier, delivered or not
    pub notifications_dispatched: AtomicU64,
}

/// Why a fetch produced no response
#[derive(Debug)]
enum AttemptError {
    CircuitOpen,
    Fetch(FetchError),
    /// No pacing slot before the item's deadline; carries the last failure
    OutOfTime(Option<FetchError>),
}

pub(crate) struct PageProcessor {
    pub fetcher: Arc<dyn Fetcher>,
    pub limiter: Arc<AdaptiveRateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
    pub max_retry_after: Duration,
    /// Time `process` may spend on one item, retries included
    pub item_budget: Duration,
    pub detector: Arc<ContentChangeDetector>,
    pub strategy: Arc<AdaptiveCrawlStrategy>,
    pub robots: Arc<dyn RobotsPolicy>,
    pub components: Components,
    pub notify_threshold_percent: f64,
    pub counters: Arc<RunCounters>,
}

#[async_trait]
impl ItemProcessor<FrontierEntry> for PageProcessor {
    /// Waits for the domain's first pacing slot
    ///
    /// Skipped when the item will not be fetched anyway.
    async fn prepare(&self, entry: &FrontierEntry) {
        let Ok(domain) = domain_of(&entry.url) else {
            return;
        };
        if self.breaker.state_of(&domain) == Some(CircuitState::Open) {
            return;
        }
        if !self.robots.is_allowed(&entry.url).await {
            return;
        }
        self.limiter.wait_for_permission(&domain).await;
    }

    async fn process(&self, entry: &FrontierEntry) -> crate::Result<ItemOutcome> {
        let deadline = Instant::now() + self.item_budget;
        let url = entry.url.as_str();
        let domain = domain_of(url)?;

        if !self.robots.is_allowed(url).await {
            return Ok(ItemOutcome::skipped());
        }

        let response = match self.fetch(url, &domain, deadline).await {
            Ok(response) => response,
            Err(AttemptError::CircuitOpen) => {
                tracing::debug!("Circuit open for {}, not fetching {}", domain, url);
                return Ok(ItemOutcome::circuit_rejected());
            }
            Err(AttemptError::Fetch(source)) | Err(AttemptError::OutOfTime(Some(source))) => {
                return Err(TideError::Fetch {
                    url: url.to_string(),
                    source,
                })
            }
            Err(AttemptError::OutOfTime(None)) => {
                return Err(TideError::Fetch {
                    url: url.to_string(),
                    source: FetchError::Timeout,
                })
            }
        };

        let status = response.status_code;
        let Some((raw_content, page)) = self.extract(url, &response).await? else {
            tracing::debug!(
                "No extractor for {} ({})",
                url,
                response.content_type.as_deref().unwrap_or("unknown type")
            );
            return Ok(ItemOutcome::processed(Some(status)));
        };

        self.track_changes(url, &raw_content, &page, &response);
        self.feed_back(entry, &page);

        Ok(ItemOutcome::processed(Some(status)))
    }
}

impl PageProcessor {
    /// Fetches with circuit gating and retries
    ///
    /// The first attempt uses the pacing slot taken in `prepare`. Later
    /// attempts wait for a fresh slot outside the circuit breaker and give up
    /// when none opens before `deadline`. Every outcome is reported back to
    /// the limiter.
    async fn fetch(
        &self,
        url: &str,
        domain: &str,
        deadline: Instant,
    ) -> Result<FetchResponse, AttemptError> {
        let retry_fetch = transient_only(self.max_retry_after);
        let last_error: Mutex<Option<FetchError>> = Mutex::new(None);
        let last_error = &last_error;

        self.retry
            .execute(
                |attempt| async move {
                    if attempt > 1 {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if !self.limiter.wait_for_permission_within(domain, remaining).await {
                            tracing::debug!("No pacing slot for {} before its deadline", url);
                            let previous = last_error
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .take();
                            return Err(AttemptError::OutOfTime(previous));
                        }
                    }

                    let execution = self
                        .breaker
                        .execute_with(
                            domain,
                            || async {
                                tracing::trace!("Fetching {} (attempt {})", url, attempt);
                                self.fetcher.fetch(url).await?.error_for_status()
                            },
                            FetchError::is_capacity_signal,
                        )
                        .await;

                    match execution {
                        Execution::Rejected => Err(AttemptError::CircuitOpen),
                        Execution::Ran(Ok(response)) => {
                            self.limiter
                                .report_success(domain, response.elapsed.as_secs_f64() * 1000.0);
                            Ok(response)
                        }
                        Execution::Ran(Err(error)) => {
                            self.limiter.report_failure(domain, &error);
                            *last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(error.clone());
                            Err(AttemptError::Fetch(error))
                        }
                    }
                },
                |error| match error {
                    AttemptError::CircuitOpen | AttemptError::OutOfTime(_) => RetryDecision::Stop,
                    AttemptError::Fetch(e) => retry_fetch(e),
                },
            )
            .await
    }

    /// Raw content and extracted page; `None` when nothing can read the body
    async fn extract(
        &self,
        url: &str,
        response: &FetchResponse,
    ) -> crate::Result<Option<(String, ParsedPage)>> {
        if response.is_html() {
            let html = match &self.components.renderer {
                Some(renderer) => renderer.render(url).await?,
                None => response.text(),
            };
            let base = Url::parse(&response.url).or_else(|_| Url::parse(url))?;
            let page = parse_html(&html, &base);
            return Ok(Some((html, page)));
        }

        let content_type = response.content_type.as_deref().unwrap_or_default();
        match &self.components.document_processor {
            Some(processor) if processor.supports(content_type) => {
                let page = processor.extract(response).await?;
                Ok(Some((response.text(), page)))
            }
            _ => Ok(None),
        }
    }

    fn track_changes(&self, url: &str, raw_content: &str, page: &ParsedPage, response: &FetchResponse) {
        let change = self.detector.track_page_version_with_metadata(
            url,
            raw_content,
            &page.text,
            version_metadata(page, response),
        );

        match change.change_type {
            ChangeType::None => return,
            ChangeType::Addition => {
                self.counters.pages_added.fetch_add(1, Ordering::Relaxed);
                return;
            }
            ChangeType::Modification | ChangeType::Removal => {
                self.counters.changes_detected.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::info!(
            "{} detected on {} ({:.1}%)",
            change.change_type,
            url,
            change.change_percentage
        );

        let Some(notifier) = self.components.notifier.clone() else {
            return;
        };
        if change.change_percentage < self.notify_threshold_percent {
            return;
        }

        self.counters.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&url, &change).await {
                tracing::warn!("Change notification for {} failed: {}", url, e);
            }
        });
    }

    /// Reports page quality to the strategy and queues the page's links
    fn feed_back(&self, entry: &FrontierEntry, page: &ParsedPage) {
        let quality = quality_score(page.text.len(), page.links.len());
        let depth_limit = self.strategy.adjust_depth_based_on_quality(&entry.url, quality);

        self.strategy.update_page_metadata(
            &entry.url,
            PageMetadata {
                quality,
                title: page.title.clone(),
                text_length: page.text.len(),
                outbound_links: page.links.len(),
                depth_limit,
                last_crawled: Some(Utc::now()),
            },
        );

        let queued = page
            .links
            .iter()
            .filter(|link| self.strategy.add_discovered(link, entry.depth + 1, &entry.url))
            .count();

        if queued > 0 {
            self.counters
                .links_discovered
                .fetch_add(queued as u64, Ordering::Relaxed);
            tracing::debug!("Queued {} new links from {}", queued, entry.url);
        }
    }
}

/// Metadata stored with each page version
fn version_metadata(page: &ParsedPage, response: &FetchResponse) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(title) = &page.title {
        metadata.insert("title".to_string(), title.clone());
    }
    if let Some(content_type) = &response.content_type {
        metadata.insert("content_type".to_string(), content_type.clone());
    }
    metadata.insert("status_code".to_string(), response.status_code.to_string());
    metadata.insert("final_url".to_string(), response.url.clone());
    metadata
}

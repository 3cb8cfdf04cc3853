//! Bounded-concurrency processing pipeline
//!
//! Items go in through [`ProcessingPipeline::try_add`] and come out as one
//! [`ProcessingResult`] each through [`ProcessingPipeline::try_receive`].
//!
//! # Capacity
//!
//! Each accepted item holds a semaphore permit from the moment it is queued
//! until its result has been emitted, so queued plus in-flight items never
//! exceed `queue_capacity`. When no permit is free `try_add` returns false and
//! the caller decides what to do with the item.
//!
//! # Shutdown
//!
//! - [`complete`](ProcessingPipeline::complete): no more input; workers drain
//!   the queue and exit, after which `try_receive` reports
//!   [`Received::Closed`].
//! - Cancelling the token: `try_add` starts refusing, in-flight items finish or
//!   time out, and items still queued are emitted as cancelled results.

mod processor;
mod result;

pub use processor::{processor_fn, FnProcessor, ItemProcessor, PipelineItem};
pub use result::{ItemOutcome, PipelineStatus, ProcessingResult, ResultKind};

use crate::config::CrawlerConfig;
use crate::TideError;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pipeline sizing and timing
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub per_item_timeout: Duration,
    pub metrics_interval: Duration,
}

impl PipelineConfig {
    pub fn from_crawler_config(config: &CrawlerConfig) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            per_item_timeout: config.per_item_timeout(),
            metrics_interval: config.metrics_interval(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_crawler_config(&CrawlerConfig::default())
    }
}

/// Outcome of [`ProcessingPipeline::try_receive`]
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Result(ProcessingResult),
    /// Nothing arrived within the timeout; more may follow
    Empty,
    /// Every worker has exited and every result has been received
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    processing: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn status(&self) -> PipelineStatus {
        PipelineStatus {
            queued_items: self.queued.load(Ordering::Relaxed),
            processing_items: self.processing.load(Ordering::Relaxed),
            completed_items: self.completed.load(Ordering::Relaxed),
            failed_items: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &ProcessingResult) {
        if result.kind.is_failure() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct Slot<T> {
    item: T,
    _permit: OwnedSemaphorePermit,
}

/// State shared by every worker task
struct WorkerContext<T: PipelineItem> {
    receiver: tokio::sync::Mutex<mpsc::Receiver<Slot<T>>>,
    results: mpsc::UnboundedSender<ProcessingResult>,
    processor: Arc<dyn ItemProcessor<T>>,
    counters: Arc<Counters>,
    per_item_timeout: Duration,
    token: CancellationToken,
    live_workers: AtomicUsize,
    workers_done: CancellationToken,
    status: watch::Sender<PipelineStatus>,
}

pub struct ProcessingPipeline<T: PipelineItem> {
    sender: Mutex<Option<mpsc::Sender<Slot<T>>>>,
    permits: Arc<Semaphore>,
    results: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProcessingResult>>,
    counters: Arc<Counters>,
    status: watch::Receiver<PipelineStatus>,
    token: CancellationToken,
    completed: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: PipelineItem> ProcessingPipeline<T> {
    /// Starts `worker_count` workers and the metrics task
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: PipelineConfig,
        processor: Arc<dyn ItemProcessor<T>>,
        token: CancellationToken,
    ) -> crate::Result<Self> {
        if config.worker_count == 0 || config.queue_capacity == 0 {
            return Err(TideError::Initialization(
                "pipeline needs at least one worker and one queue slot".to_string(),
            ));
        }
        if config.per_item_timeout.is_zero() || config.metrics_interval.is_zero() {
            return Err(TideError::Initialization(
                "pipeline timeouts must be greater than zero".to_string(),
            ));
        }

        let (item_tx, item_rx) = mpsc::channel(config.queue_capacity);
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PipelineStatus::default());
        let counters = Arc::new(Counters::default());

        let context = Arc::new(WorkerContext {
            receiver: tokio::sync::Mutex::new(item_rx),
            results: result_tx,
            processor,
            counters: Arc::clone(&counters),
            per_item_timeout: config.per_item_timeout,
            token: token.clone(),
            live_workers: AtomicUsize::new(config.worker_count),
            workers_done: CancellationToken::new(),
            status: status_tx,
        });

        let mut handles = Vec::with_capacity(config.worker_count + 1);
        for id in 0..config.worker_count {
            handles.push(tokio::spawn(run_worker(id, Arc::clone(&context))));
        }
        handles.push(tokio::spawn(run_metrics(
            Arc::clone(&context),
            config.metrics_interval,
        )));

        debug!(
            "Pipeline started with {} workers, capacity {}",
            config.worker_count, config.queue_capacity
        );

        Ok(Self {
            sender: Mutex::new(Some(item_tx)),
            permits: Arc::new(Semaphore::new(config.queue_capacity)),
            results: tokio::sync::Mutex::new(result_rx),
            counters,
            status: status_rx,
            token,
            completed: AtomicBool::new(false),
            handles: Mutex::new(handles),
        })
    }

    /// Offers an item; false means full, completed or cancelled
    pub fn try_add(&self, item: T) -> bool {
        self.offer(item).is_ok()
    }

    /// Like [`try_add`](Self::try_add), but hands a refused item back
    pub fn offer(&self, item: T) -> Result<(), T> {
        if self.completed.load(Ordering::Acquire) || self.token.is_cancelled() {
            return Err(item);
        }

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(item);
        };

        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(item);
        };

        // Count before sending so a fast worker never sees a zero queue
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        sender
            .try_send(Slot {
                item,
                _permit: permit,
            })
            .map_err(|e| {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                e.into_inner().item
            })
    }

    /// Waits up to `timeout` for the next result
    pub async fn try_receive(&self, timeout: Duration) -> Received {
        let mut results = self.results.lock().await;
        match tokio::time::timeout(timeout, results.recv()).await {
            Ok(Some(result)) => Received::Result(result),
            Ok(None) => Received::Closed,
            Err(_) => Received::Empty,
        }
    }

    /// Signals that no more items will be added
    pub fn complete(&self) {
        if !self.completed.swap(true, Ordering::AcqRel) {
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            debug!("Pipeline input completed");
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Free capacity for new items
    pub fn available_capacity(&self) -> usize {
        self.permits.available_permits()
    }

    /// Current counters, computed on demand
    pub fn status(&self) -> PipelineStatus {
        self.counters.status()
    }

    /// Periodic status snapshots, refreshed every metrics interval
    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    /// Waits for the workers and the metrics task to exit
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }
    }
}

impl<T: PipelineItem> Drop for ProcessingPipeline<T> {
    fn drop(&mut self) {
        self.complete();
    }
}

async fn run_worker<T: PipelineItem>(id: usize, ctx: Arc<WorkerContext<T>>) {
    loop {
        let next = {
            let mut receiver = ctx.receiver.lock().await;
            tokio::select! {
                biased;
                _ = ctx.token.cancelled() => None,
                slot = receiver.recv() => slot,
            }
        };

        let Some(slot) = next else {
            break;
        };

        ctx.counters.queued.fetch_sub(1, Ordering::Relaxed);
        ctx.counters.processing.fetch_add(1, Ordering::Relaxed);

        let result = process_item(&ctx, &slot.item).await;

        ctx.counters.processing.fetch_sub(1, Ordering::Relaxed);
        ctx.counters.record(&result);
        let _ = ctx.results.send(result);
        drop(slot);
    }

    if ctx.token.is_cancelled() {
        drain_cancelled(&ctx).await;
    }

    debug!("Pipeline worker {} exiting", id);
    if ctx.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
        let _ = ctx.status.send(ctx.counters.status());
        ctx.workers_done.cancel();
    }
}

async fn process_item<T: PipelineItem>(ctx: &WorkerContext<T>, item: &T) -> ProcessingResult {
    let url = item.url();

    let prepared = tokio::select! {
        biased;
        _ = ctx.token.cancelled() => return ProcessingResult::cancelled(url),
        prepared = AssertUnwindSafe(ctx.processor.prepare(item)).catch_unwind() => prepared,
    };
    if let Err(panic) = prepared {
        let message = panic_message(panic);
        warn!("Processor panicked preparing {}: {}", url, message);
        return ProcessingResult::failed(url, format!("processor panicked: {}", message), None, 0);
    }

    let started = Instant::now();
    let outcome = tokio::time::timeout(
        ctx.per_item_timeout,
        AssertUnwindSafe(ctx.processor.process(item)).catch_unwind(),
    )
    .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(Ok(outcome))) => ProcessingResult::from_outcome(url, outcome, duration_ms),
        Ok(Ok(Err(e))) => {
            debug!("Processing {} failed: {}", url, e);
            let status = match &e {
                TideError::Fetch { source, .. } => source.status_code(),
                _ => None,
            };
            ProcessingResult::failed(url, e.to_string(), status, duration_ms)
        }
        Ok(Err(panic)) => {
            let message = panic_message(panic);
            warn!("Processor panicked on {}: {}", url, message);
            ProcessingResult::failed(url, format!("processor panicked: {}", message), None, duration_ms)
        }
        Err(_) => {
            warn!("Processing {} timed out after {}ms", url, duration_ms);
            ProcessingResult::timed_out(url, duration_ms)
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn drain_cancelled<T: PipelineItem>(ctx: &WorkerContext<T>) {
    let mut receiver = ctx.receiver.lock().await;
    while let Ok(slot) = receiver.try_recv() {
        ctx.counters.queued.fetch_sub(1, Ordering::Relaxed);
        let result = ProcessingResult::cancelled(slot.item.url());
        ctx.counters.record(&result);
        let _ = ctx.results.send(result);
    }
}

async fn run_metrics<T: PipelineItem>(ctx: Arc<WorkerContext<T>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = ctx.workers_done.cancelled() => break,
            _ = interval.tick() => {
                let status = ctx.counters.status();
                info!(
                    queued = status.queued_items,
                    processing = status.processing_items,
                    completed = status.completed_items,
                    failed = status.failed_items,
                    "Pipeline status"
                );
                let _ = ctx.status.send(status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchError;
    use std::sync::atomic::AtomicU32;

    fn config(workers: usize, capacity: usize) -> PipelineConfig {
        PipelineConfig {
            worker_count: workers,
            queue_capacity: capacity,
            per_item_timeout: Duration::from_secs(5),
            metrics_interval: Duration::from_millis(50),
        }
    }

    fn boxed<F, Fut>(func: F) -> Arc<dyn ItemProcessor<String>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::Result<ItemOutcome>> + Send + 'static,
    {
        Arc::new(processor_fn::<String, _, _>(func))
    }

    fn ok_processor() -> Arc<dyn ItemProcessor<String>> {
        boxed(|_url| async { Ok(ItemOutcome::processed(Some(200))) })
    }

    async fn drain(pipeline: &ProcessingPipeline<String>) -> Vec<ProcessingResult> {
        let mut results = Vec::new();
        loop {
            match pipeline.try_receive(Duration::from_secs(10)).await {
                Received::Result(result) => results.push(result),
                Received::Empty => panic!("pipeline stalled"),
                Received::Closed => return results,
            }
        }
    }

    #[tokio::test]
    async fn test_processes_every_item_once() {
        let pipeline =
            ProcessingPipeline::new(config(4, 16), ok_processor(), CancellationToken::new()).unwrap();

        for i in 0..10 {
            assert!(pipeline.try_add(format!("https://example.com/{}", i)));
        }
        pipeline.complete();

        let mut urls: Vec<String> = drain(&pipeline).await.into_iter().map(|r| r.url).collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 10);

        let status = pipeline.status();
        assert_eq!(status.completed_items, 10);
        assert_eq!(status.queued_items, 0);
        assert_eq!(status.processing_items, 0);
    }

    #[tokio::test]
    async fn test_try_add_rejects_when_full() {
        let gate = Arc::new(Semaphore::new(0));
        let waiting = Arc::clone(&gate);
        let processor = boxed(move |_url| {
            let waiting = Arc::clone(&waiting);
            async move {
                if let Ok(permit) = waiting.acquire().await {
                    permit.forget();
                }
                Ok(ItemOutcome::processed(None))
            }
        });

        let pipeline = ProcessingPipeline::new(config(1, 2), processor, CancellationToken::new()).unwrap();
        assert!(pipeline.try_add("a".to_string()));
        assert!(pipeline.try_add("b".to_string()));
        assert!(!pipeline.try_add("c".to_string()));
        assert_eq!(pipeline.offer("c".to_string()), Err("c".to_string()));
        assert_eq!(pipeline.available_capacity(), 0);

        gate.add_permits(1);
        assert!(matches!(
            pipeline.try_receive(Duration::from_secs(5)).await,
            Received::Result(_)
        ));
        assert!(pipeline.try_add("c".to_string()));

        gate.add_permits(2);
        pipeline.complete();
        let rest = drain(&pipeline).await;
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn test_try_add_after_complete_fails() {
        let pipeline =
            ProcessingPipeline::new(config(1, 4), ok_processor(), CancellationToken::new()).unwrap();
        pipeline.complete();
        assert!(!pipeline.try_add("a".to_string()));
        assert_eq!(pipeline.try_receive(Duration::from_secs(5)).await, Received::Closed);
    }

    #[tokio::test]
    async fn test_receive_times_out_while_open() {
        let pipeline =
            ProcessingPipeline::new(config(1, 4), ok_processor(), CancellationToken::new()).unwrap();
        assert_eq!(
            pipeline.try_receive(Duration::from_millis(20)).await,
            Received::Empty
        );
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_failed_results() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let processor = boxed(move |url| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if url == "panic" {
                    panic!("bad page");
                }
                if url == "error" {
                    return Err(TideError::Fetch {
                        url,
                        source: FetchError::ClientError { status: 404 },
                    });
                }
                Ok(ItemOutcome::processed(Some(200)))
            }
        });

        let pipeline = ProcessingPipeline::new(config(1, 8), processor, CancellationToken::new()).unwrap();
        for url in ["panic", "error", "fine"] {
            assert!(pipeline.try_add(url.to_string()));
        }
        pipeline.complete();

        let results = drain(&pipeline).await;
        assert_eq!(results.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let by_url = |u: &str| results.iter().find(|r| r.url == u).cloned().unwrap();
        assert_eq!(by_url("panic").kind, ResultKind::Failed);
        assert!(by_url("panic").error.unwrap().contains("bad page"));
        assert_eq!(by_url("error").status_code, Some(404));
        assert!(by_url("fine").success);
        assert_eq!(pipeline.status().failed_items, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_item_timeout() {
        let processor = boxed(|_url| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ItemOutcome::processed(None))
        });
        let mut cfg = config(1, 2);
        cfg.per_item_timeout = Duration::from_millis(100);

        let pipeline = ProcessingPipeline::new(cfg, processor, CancellationToken::new()).unwrap();
        pipeline.try_add("slow".to_string());
        pipeline.complete();

        let results = drain(&pipeline).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, ResultKind::TimedOut);
        assert!(!results[0].success);
    }

    struct SlowStart {
        wait: Duration,
        prepared: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ItemProcessor<String> for SlowStart {
        async fn prepare(&self, _item: &String) {
            tokio::time::sleep(self.wait).await;
            self.prepared.fetch_add(1, Ordering::SeqCst);
        }

        async fn process(&self, _item: &String) -> crate::Result<ItemOutcome> {
            Ok(ItemOutcome::processed(Some(200)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_time_is_outside_item_timeout() {
        let processor = Arc::new(SlowStart {
            wait: Duration::from_secs(5),
            prepared: AtomicUsize::new(0),
        });
        let mut cfg = config(1, 4);
        cfg.per_item_timeout = Duration::from_secs(1);

        let shared: Arc<dyn ItemProcessor<String>> = processor.clone();
        let pipeline = ProcessingPipeline::new(cfg, shared, CancellationToken::new()).unwrap();
        pipeline.try_add("a".to_string());
        pipeline.try_add("b".to_string());
        pipeline.complete();

        let results = drain(&pipeline).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.kind == ResultKind::Processed));
        assert_eq!(processor.prepared.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_prepare() {
        let token = CancellationToken::new();
        let processor = Arc::new(SlowStart {
            wait: Duration::from_secs(3600),
            prepared: AtomicUsize::new(0),
        });

        let shared: Arc<dyn ItemProcessor<String>> = processor.clone();
        let pipeline = ProcessingPipeline::new(config(1, 4), shared, token.clone()).unwrap();
        pipeline.try_add("waiting".to_string());
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let results = drain(&pipeline).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, ResultKind::Cancelled);
        assert_eq!(processor.prepared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_emits_cancelled_for_queued_items() {
        let token = CancellationToken::new();
        let started = Arc::new(tokio::sync::Notify::new());
        let signal = Arc::clone(&started);
        let processor = boxed(move |_url| {
            let signal = Arc::clone(&signal);
            async move {
                signal.notify_one();
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(ItemOutcome::processed(None))
            }
        });

        let pipeline = ProcessingPipeline::new(config(1, 8), processor, token.clone()).unwrap();
        for i in 0..4 {
            pipeline.try_add(format!("item-{}", i));
        }

        started.notified().await;
        token.cancel();
        assert!(!pipeline.try_add("late".to_string()));

        let results = drain(&pipeline).await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].kind, ResultKind::Processed);
        assert!(results[1..].iter().all(|r| r.kind == ResultKind::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_workers() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let processor = boxed(move |_url| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(ItemOutcome::processed(None))
            }
        });

        let pipeline = ProcessingPipeline::new(config(3, 32), processor, CancellationToken::new()).unwrap();
        for i in 0..20 {
            assert!(pipeline.try_add(i.to_string()));
        }
        pipeline.complete();

        assert_eq!(drain(&pipeline).await.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_metrics_snapshots_are_published() {
        let pipeline =
            ProcessingPipeline::new(config(2, 8), ok_processor(), CancellationToken::new()).unwrap();
        let mut status = pipeline.subscribe();

        pipeline.try_add("a".to_string());
        pipeline.complete();
        drain(&pipeline).await;
        pipeline.join().await;

        status.changed().await.unwrap();
        assert_eq!(status.borrow().completed_items, 1);
    }

    #[tokio::test]
    async fn test_rejects_zero_workers() {
        let result = ProcessingPipeline::new(config(0, 8), ok_processor(), CancellationToken::new());
        assert!(result.is_err());
    }
}

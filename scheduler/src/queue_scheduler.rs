use std::sync::Arc;

use crawlq_core::async_trait;
use crawlq_core::context::CrawlContext;
use crawlq_core::error::{Error, Result};
use crawlq_core::request::Request;
use crawlq_core::stats::{MemoryStatsCollector, StatsCollector};
use crawlq_queue::{Broker, FifoMemoryQueue, QueueBackend};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::backends::{build_queue, RequestQueue};
use crate::dupefilter::{DupeFilter, RequestFingerprintFilter};
use crate::fingerprint::RequestFingerprinter;
use crate::scheduler_trait::Scheduler;
use crate::types::{QueueKind, SchedulerConfig};

struct OpenState {
    context: CrawlContext,
    queue: RequestQueue,
    /// Requests a serialized queue could not encode
    fallback: FifoMemoryQueue<Request>,
}

/// Scheduler composing a duplicate filter with one queue backend.
///
/// Duplicate check and push happen under one lock, so a single instance
/// never admits the same fingerprint twice. Records that cannot be read
/// back are logged, counted and skipped.
pub struct QueueScheduler {
    config: SchedulerConfig,
    dupefilter: Box<dyn DupeFilter>,
    stats: Arc<dyn StatsCollector>,
    broker: Option<Arc<dyn Broker>>,
    state: Mutex<Option<OpenState>>,
}

impl QueueScheduler {
    /// Create a scheduler with the default fingerprint filter
    pub fn new(config: SchedulerConfig) -> Self {
        let fingerprinter = RequestFingerprinter::with_headers(&config.include_headers);
        let mut dupefilter = RequestFingerprintFilter::new(fingerprinter, config.dupefilter_debug);
        if let Some(jobdir) = &config.jobdir {
            dupefilter = dupefilter.with_jobdir(jobdir);
        }

        Self {
            config,
            dupefilter: Box::new(dupefilter),
            stats: Arc::new(MemoryStatsCollector::new()),
            broker: None,
            state: Mutex::new(None),
        }
    }

    /// Use a different duplicate filter
    pub fn with_dupefilter(mut self, dupefilter: Box<dyn DupeFilter>) -> Self {
        self.dupefilter = dupefilter;
        self
    }

    /// Record counters in `stats`
    pub fn with_stats(mut self, stats: Arc<dyn StatsCollector>) -> Self {
        self.stats = stats;
        self
    }

    /// Use an existing broker instead of connecting to `broker_url`
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// The scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The stats collector
    pub fn stats(&self) -> &Arc<dyn StatsCollector> {
        &self.stats
    }

    /// The duplicate filter
    pub fn dupefilter(&self) -> &dyn DupeFilter {
        self.dupefilter.as_ref()
    }

    fn count(&self, key: &str) {
        self.stats.inc_value(key, 1);
    }

    fn count_enqueued(&self, label: &str) {
        self.count("scheduler/enqueued");
        self.count(&format!("scheduler/enqueued/{}", label));
    }

    fn count_dequeued(&self, label: &str) {
        self.count("scheduler/dequeued");
        self.count(&format!("scheduler/dequeued/{}", label));
    }
}

fn not_open() -> Error {
    Error::scheduler("Scheduler is not open")
}

#[async_trait]
impl Scheduler for QueueScheduler {
    async fn open(&self, context: CrawlContext) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(current) = state.as_ref() {
            if current.context.spider_name() == context.spider_name() {
                debug!("Scheduler already open for {}", context.spider_name());
                return Ok(());
            }
            return Err(Error::scheduler(format!(
                "Scheduler is already open for {}",
                current.context.spider_name()
            ))
            .with_spider_name(context.spider_name()));
        }

        let context = match &self.config.queue_name {
            Some(name) => context.with_queue_name(name.clone()),
            None => context,
        };

        self.dupefilter.open().await?;
        let queue = build_queue(&self.config, &context, self.broker.clone()).await?;

        if self.config.queue == QueueKind::Broker && self.config.priority {
            info!("Broker queues do not order by priority; SCHEDULER_PRIORITY is ignored");
        }

        let pending = queue.len().await?;
        info!(
            "Scheduler opened: queue={} name={} pending={}",
            self.config.queue,
            context.queue_name(),
            pending
        );

        *state = Some(OpenState {
            context,
            queue,
            fallback: FifoMemoryQueue::new(),
        });
        Ok(())
    }

    async fn close(&self, reason: &str) -> Result<()> {
        let state = self.state.lock().await.take();

        let queue_result = match state {
            Some(state) => {
                let pending = state.queue.len().await.unwrap_or(0);
                let lost = state.fallback.len().await.unwrap_or(0);
                if lost > 0 {
                    warn!(
                        "Discarding {} in-memory requests that could not be stored",
                        lost
                    );
                }
                info!(
                    "Scheduler closed ({}): queue={} pending={}",
                    reason, self.config.queue, pending
                );
                state.queue.close().await
            }
            None => Ok(()),
        };
        let filter_result = self.dupefilter.close(reason).await;

        queue_result.and(filter_result)
    }

    async fn enqueue(&self, request: Request) -> Result<bool> {
        let state = self.state.lock().await;
        let state = state.as_ref().ok_or_else(not_open)?;

        let filtered = !request.dont_filter();
        if filtered && self.dupefilter.request_seen(&request).await? {
            self.dupefilter.log(&request, self.stats.as_ref());
            return Ok(false);
        }

        let label = self.config.queue.backend_label();
        let url = request.url().to_string();
        // push consumes the request
        let spare = if filtered || self.config.queue.is_serialized() {
            Some(request.clone())
        } else {
            None
        };

        match state.queue.push(request).await {
            Ok(()) => {
                self.count_enqueued(label);
                Ok(true)
            }
            Err(e) if e.is_item_failure() && self.config.queue.is_serialized() => {
                if self.config.log_unserializable {
                    warn!("Unable to serialize request: {} - reason: {}", url, e);
                }
                self.count("scheduler/unserializable");
                if let Some(request) = spare {
                    state.fallback.push(request).await?;
                    self.count_enqueued("memory");
                }
                Ok(true)
            }
            Err(e) => {
                // not stored, so a retry must not be filtered
                if let (true, Some(request)) = (filtered, spare.as_ref()) {
                    if let Err(undo) = self.dupefilter.forget(request).await {
                        warn!("Unable to forget fingerprint of {}: {}", url, undo);
                    }
                }
                Err(e.with_spider_name(state.context.spider_name()))
            }
        }
    }

    async fn dequeue(&self) -> Result<Option<Request>> {
        let state = self.state.lock().await;
        let state = state.as_ref().ok_or_else(not_open)?;

        if let Some(request) = state.fallback.pop().await? {
            self.count_dequeued("memory");
            return Ok(Some(request));
        }

        let label = self.config.queue.backend_label();
        loop {
            match state.queue.pop().await {
                Ok(Some(request)) => {
                    self.count_dequeued(label);
                    return Ok(Some(request));
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_item_failure() => {
                    warn!("Dropping unreadable request from {} queue: {}", label, e);
                    self.count("scheduler/unserializable");
                }
                Err(e) => return Err(e.with_spider_name(state.context.spider_name())),
            }
        }
    }

    async fn size(&self) -> Result<usize> {
        let state = self.state.lock().await;
        match state.as_ref() {
            Some(state) => Ok(state.queue.len().await? + state.fallback.len().await?),
            None => Ok(0),
        }
    }
}

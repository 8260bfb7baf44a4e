use super::*;
use crawlq_core::async_trait;
use crawlq_core::callback::{Callback, CallbackRegistry, Component, ComponentId};
use crawlq_core::context::CrawlContext;
use crawlq_core::error::{Error, Result};
use crawlq_core::request::Request;
use crawlq_core::response::{ParseOutput, Response};
use crawlq_core::stats::{MemoryStatsCollector, StatsCollector};
use crawlq_queue::{Broker, Delivery, MemoryBroker};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct ArticleSpider;

#[async_trait]
impl Component for ArticleSpider {
    fn component_id(&self) -> ComponentId {
        ComponentId::new("news::articles", "ArticleSpider")
    }

    fn has_handler(&self, handler: &str) -> bool {
        handler == "parse_article"
    }

    async fn invoke(&self, _handler: &str, _response: Response) -> Result<ParseOutput> {
        Ok(ParseOutput::new())
    }
}

fn get(url: &str) -> Request {
    Request::get(url).unwrap()
}

fn article(url: &str) -> Request {
    let callback = Callback::new(Arc::new(ArticleSpider), "parse_article").unwrap();
    Request::builder(url).callback(callback).build().unwrap()
}

fn prioritized(url: &str, priority: i32) -> Request {
    Request::builder(url).priority(priority).build().unwrap()
}

fn news_context() -> CrawlContext {
    let mut registry = CallbackRegistry::new();
    registry.register_shared(Arc::new(ArticleSpider));
    CrawlContext::new("news").with_registry(registry)
}

fn memory_config(queue: QueueKind) -> SchedulerConfig {
    SchedulerConfig {
        queue,
        priority: false,
        ..SchedulerConfig::default()
    }
}

fn broker_config() -> SchedulerConfig {
    SchedulerConfig {
        queue: QueueKind::Broker,
        priority: false,
        ..SchedulerConfig::default()
    }
}

async fn drain_urls<S: Scheduler>(scheduler: &S) -> Vec<String> {
    let mut urls = Vec::new();
    while let Some(request) = scheduler.dequeue().await.unwrap() {
        urls.push(request.url().to_string());
    }
    urls
}

#[tokio::test]
async fn test_duplicate_suppression() {
    let stats = Arc::new(MemoryStatsCollector::new());
    let scheduler = QueueScheduler::new(memory_config(QueueKind::MemoryFifo)).with_stats(stats.clone());
    scheduler.open(CrawlContext::new("test")).await.unwrap();

    assert!(scheduler.enqueue(get("https://example.com/a?x=1&y=2")).await.unwrap());
    assert!(!scheduler.enqueue(get("https://example.com/a?y=2&x=1")).await.unwrap());
    assert_eq!(scheduler.size().await.unwrap(), 1);

    let forced = Request::builder("https://example.com/a?x=1&y=2")
        .dont_filter(true)
        .build()
        .unwrap();
    assert!(scheduler.enqueue(forced.clone()).await.unwrap());
    assert!(scheduler.enqueue(forced).await.unwrap());
    assert_eq!(scheduler.size().await.unwrap(), 3);

    assert_eq!(stats.get_value("dupefilter/filtered"), Some(1));
    assert_eq!(stats.get_value("scheduler/enqueued"), Some(3));
    assert_eq!(stats.get_value("scheduler/enqueued/memory"), Some(3));

    assert_eq!(drain_urls(&scheduler).await.len(), 3);
    assert_eq!(stats.get_value("scheduler/dequeued/memory"), Some(3));
    scheduler.close("finished").await.unwrap();
}

#[tokio::test]
async fn test_fifo_and_lifo_order() {
    let fifo = QueueScheduler::new(memory_config(QueueKind::MemoryFifo));
    let lifo = QueueScheduler::new(memory_config(QueueKind::MemoryLifo));
    fifo.open(CrawlContext::new("test")).await.unwrap();
    lifo.open(CrawlContext::new("test")).await.unwrap();

    for url in ["https://example.com/a", "https://example.com/b"] {
        fifo.enqueue(get(url)).await.unwrap();
        lifo.enqueue(get(url)).await.unwrap();
    }

    assert_eq!(
        drain_urls(&fifo).await,
        vec!["https://example.com/a", "https://example.com/b"]
    );
    assert_eq!(
        drain_urls(&lifo).await,
        vec!["https://example.com/b", "https://example.com/a"]
    );
}

#[tokio::test]
async fn test_priority_order() {
    let scheduler = QueueScheduler::new(SchedulerConfig::default());
    scheduler.open(CrawlContext::new("test")).await.unwrap();

    scheduler.enqueue(prioritized("https://example.com/1", 1)).await.unwrap();
    scheduler.enqueue(prioritized("https://example.com/3", 3)).await.unwrap();
    scheduler.enqueue(prioritized("https://example.com/2", 2)).await.unwrap();
    scheduler.enqueue(prioritized("https://example.com/neg", -1)).await.unwrap();

    assert_eq!(
        drain_urls(&scheduler).await,
        vec![
            "https://example.com/3",
            "https://example.com/2",
            "https://example.com/1",
            "https://example.com/neg",
        ]
    );
}

#[tokio::test]
async fn test_empty_queue_contract() {
    let scheduler = QueueScheduler::new(SchedulerConfig::default());
    scheduler.open(CrawlContext::new("test")).await.unwrap();

    assert!(scheduler.dequeue().await.unwrap().is_none());
    assert!(!scheduler.has_pending_work().await.unwrap());
    assert_eq!(scheduler.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lifecycle_without_open() {
    let scheduler = QueueScheduler::new(SchedulerConfig::default());

    assert_eq!(scheduler.size().await.unwrap(), 0);
    let err = scheduler.dequeue().await.unwrap_err();
    assert!(matches!(err, Error::Scheduler { .. }));
    assert!(scheduler.enqueue(get("https://example.com/")).await.is_err());

    scheduler.close("never opened").await.unwrap();
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let scheduler = QueueScheduler::new(SchedulerConfig::default());
    scheduler.open(CrawlContext::new("test")).await.unwrap();
    scheduler.enqueue(get("https://example.com/")).await.unwrap();

    scheduler.open(CrawlContext::new("test")).await.unwrap();
    assert_eq!(scheduler.size().await.unwrap(), 1);

    assert!(scheduler.open(CrawlContext::new("other")).await.is_err());
}

#[tokio::test]
async fn test_failed_open_can_be_closed() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("requests.queue")).unwrap();
    std::fs::write(dir.path().join("requests.queue").join("active.json"), b"{oops").unwrap();

    let scheduler = QueueScheduler::new(SchedulerConfig::with_jobdir(dir.path()));
    let err = scheduler.open(CrawlContext::new("test")).await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));

    scheduler.close("open failed").await.unwrap();
}

async fn resume_after_restart(queue: QueueKind, priority: bool) {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig {
        queue,
        priority,
        ..SchedulerConfig::with_jobdir(dir.path())
    };
    let urls: Vec<String> = (0..5).map(|i| format!("https://example.com/{}", i)).collect();

    {
        let scheduler = QueueScheduler::new(config.clone());
        scheduler.open(news_context()).await.unwrap();
        for url in &urls {
            assert!(scheduler.enqueue(article(url)).await.unwrap());
        }
        scheduler.close("shutdown").await.unwrap();
    }

    let scheduler = QueueScheduler::new(config);
    scheduler.open(news_context()).await.unwrap();
    assert_eq!(scheduler.size().await.unwrap(), urls.len());
    assert!(!scheduler.enqueue(article(&urls[0])).await.unwrap());

    let mut seen = Vec::new();
    while let Some(request) = scheduler.dequeue().await.unwrap() {
        assert_eq!(
            request.callback().unwrap().reference().handler,
            "parse_article"
        );
        seen.push(request.url().to_string());
    }
    seen.sort();
    assert_eq!(seen, urls);
    scheduler.close("finished").await.unwrap();
}

#[tokio::test]
async fn test_resume_disk_fifo() {
    resume_after_restart(QueueKind::DiskFifo, false).await;
}

#[tokio::test]
async fn test_resume_disk_lifo_with_priority() {
    resume_after_restart(QueueKind::DiskLifo, true).await;
}

#[tokio::test]
async fn test_disk_lifo_order_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig {
        queue: QueueKind::DiskLifo,
        ..SchedulerConfig::with_jobdir(dir.path())
    };
    {
        let scheduler = QueueScheduler::new(config.clone());
        scheduler.open(CrawlContext::new("test")).await.unwrap();
        scheduler.enqueue(get("https://example.com/a")).await.unwrap();
        scheduler.enqueue(get("https://example.com/b")).await.unwrap();
        scheduler.close("pause").await.unwrap();
    }

    let scheduler = QueueScheduler::new(config);
    scheduler.open(CrawlContext::new("test")).await.unwrap();
    assert_eq!(
        drain_urls(&scheduler).await,
        vec!["https://example.com/b", "https://example.com/a"]
    );
}

#[tokio::test]
async fn test_corrupt_record_isolation() {
    let broker = MemoryBroker::new();
    let stats = Arc::new(MemoryStatsCollector::new());
    let scheduler = QueueScheduler::new(broker_config())
        .with_broker(Arc::new(broker.clone()))
        .with_stats(stats.clone());
    scheduler.open(CrawlContext::new("news")).await.unwrap();

    scheduler.enqueue(get("https://example.com/first")).await.unwrap();
    broker.publish("news", b"\x00not a record".to_vec()).await.unwrap();
    scheduler.enqueue(get("https://example.com/second")).await.unwrap();

    assert_eq!(
        drain_urls(&scheduler).await,
        vec!["https://example.com/first", "https://example.com/second"]
    );
    assert_eq!(stats.get_value("scheduler/unserializable"), Some(1));
    assert_eq!(stats.get_value("scheduler/dequeued/broker"), Some(2));
    assert_eq!(broker.unacked_count("news").await, 0);
}

#[tokio::test]
async fn test_unresolvable_callback_is_skipped() {
    let broker = MemoryBroker::new();
    let producer = QueueScheduler::new(broker_config()).with_broker(Arc::new(broker.clone()));
    producer.open(news_context()).await.unwrap();
    producer.enqueue(article("https://example.com/story")).await.unwrap();
    producer.enqueue(get("https://example.com/plain")).await.unwrap();

    let stats = Arc::new(MemoryStatsCollector::new());
    let consumer = QueueScheduler::new(broker_config())
        .with_broker(Arc::new(broker.clone()))
        .with_stats(stats.clone());
    consumer.open(CrawlContext::new("news")).await.unwrap();

    assert_eq!(drain_urls(&consumer).await, vec!["https://example.com/plain"]);
    assert_eq!(stats.get_value("scheduler/unserializable"), Some(1));
}

#[tokio::test]
async fn test_broker_consumers_share_work() {
    let broker = MemoryBroker::new();
    let producer = QueueScheduler::new(broker_config()).with_broker(Arc::new(broker.clone()));
    producer.open(CrawlContext::new("jobs")).await.unwrap();
    for i in 0..6 {
        producer
            .enqueue(get(&format!("https://example.com/{}", i)))
            .await
            .unwrap();
    }
    assert_eq!(producer.size().await.unwrap(), 6);

    let a = QueueScheduler::new(broker_config()).with_broker(Arc::new(broker.clone()));
    let b = QueueScheduler::new(broker_config()).with_broker(Arc::new(broker.clone()));
    a.open(CrawlContext::new("jobs")).await.unwrap();
    b.open(CrawlContext::new("jobs")).await.unwrap();

    let mut taken = Vec::new();
    loop {
        let from_a = a.dequeue().await.unwrap();
        let from_b = b.dequeue().await.unwrap();
        if from_a.is_none() && from_b.is_none() {
            break;
        }
        taken.extend(from_a.into_iter().chain(from_b).map(|r| r.url().to_string()));
    }

    taken.sort();
    taken.dedup();
    assert_eq!(taken.len(), 6);
    assert!(!producer.has_pending_work().await.unwrap());
}

#[tokio::test]
async fn test_routing_by_callback() {
    let broker = MemoryBroker::new();
    let config = SchedulerConfig {
        route_by_callback: true,
        ..broker_config()
    };
    let producer = QueueScheduler::new(config).with_broker(Arc::new(broker.clone()));
    producer.open(news_context()).await.unwrap();
    producer.enqueue(article("https://example.com/story")).await.unwrap();
    producer.enqueue(get("https://example.com/index")).await.unwrap();

    assert_eq!(broker.message_count("news::articles").await.unwrap(), 1);
    assert_eq!(producer.size().await.unwrap(), 1);

    let config = SchedulerConfig {
        queue_name: Some("news::articles".to_string()),
        ..broker_config()
    };
    let worker = QueueScheduler::new(config).with_broker(Arc::new(broker.clone()));
    worker.open(news_context()).await.unwrap();

    let request = worker.dequeue().await.unwrap().unwrap();
    assert_eq!(request.url().as_str(), "https://example.com/story");
    assert_eq!(
        request.callback().unwrap().reference().component,
        ComponentId::new("news::articles", "ArticleSpider")
    );
    assert!(worker.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stats_are_per_backend() {
    let dir = TempDir::new().unwrap();
    let stats = Arc::new(MemoryStatsCollector::new());
    let scheduler =
        QueueScheduler::new(SchedulerConfig::with_jobdir(dir.path())).with_stats(stats.clone());
    scheduler.open(CrawlContext::new("test")).await.unwrap();

    scheduler.enqueue(get("https://example.com/")).await.unwrap();
    scheduler.dequeue().await.unwrap().unwrap();

    let snapshot = stats.get_stats();
    assert_eq!(snapshot.get("scheduler/enqueued/disk"), Some(&1));
    assert_eq!(snapshot.get("scheduler/dequeued/disk"), Some(&1));
    assert_eq!(snapshot.get("scheduler/enqueued/memory"), None);
}

#[tokio::test]
async fn test_resume_after_unclean_stop() {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig::with_jobdir(dir.path());
    {
        let scheduler = QueueScheduler::new(config.clone());
        scheduler.open(news_context()).await.unwrap();
        scheduler.enqueue(article("https://example.com/a")).await.unwrap();
        scheduler.enqueue(article("https://example.com/b")).await.unwrap();
        scheduler
            .enqueue(prioritized("https://example.com/urgent", 5))
            .await
            .unwrap();
        // dropped without close
    }

    let scheduler = QueueScheduler::new(config);
    scheduler.open(news_context()).await.unwrap();
    assert_eq!(scheduler.size().await.unwrap(), 3);
    assert!(!scheduler.enqueue(article("https://example.com/a")).await.unwrap());
    assert_eq!(
        drain_urls(&scheduler).await,
        vec![
            "https://example.com/urgent",
            "https://example.com/a",
            "https://example.com/b"
        ]
    );
    scheduler.close("finished").await.unwrap();
}

/// Broker whose first publishes fail as if the connection dropped
struct FlakyBroker {
    inner: MemoryBroker,
    failures: AtomicUsize,
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.inner.declare(queue).await
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::broker("connection reset"));
        }
        self.inner.publish(queue, payload).await
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        self.inner.get(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.inner.ack(delivery).await
    }

    async fn message_count(&self, queue: &str) -> Result<usize> {
        self.inner.message_count(queue).await
    }

    async fn recover(&self, queue: &str) -> Result<usize> {
        self.inner.recover(queue).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_failed_push_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(FlakyBroker {
        inner: MemoryBroker::new(),
        failures: AtomicUsize::new(1),
    });
    let config = SchedulerConfig {
        jobdir: Some(dir.path().to_path_buf()),
        ..broker_config()
    };
    let scheduler = QueueScheduler::new(config.clone()).with_broker(broker.clone());
    scheduler.open(CrawlContext::new("news")).await.unwrap();

    let err = scheduler
        .enqueue(get("https://example.com/retry"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Broker { .. }));
    assert_eq!(scheduler.dupefilter().seen_count(), 0);

    assert!(scheduler.enqueue(get("https://example.com/retry")).await.unwrap());
    assert!(!scheduler.enqueue(get("https://example.com/retry")).await.unwrap());
    assert_eq!(scheduler.size().await.unwrap(), 1);
    scheduler.close("shutdown").await.unwrap();

    // the withdrawn mark does not come back from the seen file
    let restarted = QueueScheduler::new(config).with_broker(broker);
    restarted.open(CrawlContext::new("news")).await.unwrap();
    assert_eq!(restarted.dupefilter().seen_count(), 1);
}

/// Overwrite the payload of the second frame in a disk queue data file
fn corrupt_second_frame(data_file: &Path) {
    let mut bytes = std::fs::read(data_file).unwrap();
    let frame_len = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
    let second = 8 + frame_len(0);
    let payload_len = frame_len(second);
    for byte in &mut bytes[second + 4..second + 4 + payload_len] {
        *byte = b'#';
    }
    std::fs::write(data_file, bytes).unwrap();
}

async fn corrupt_disk_record_is_skipped(queue: QueueKind, expected: Vec<&str>) {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig {
        queue,
        priority: false,
        ..SchedulerConfig::with_jobdir(dir.path())
    };
    {
        let scheduler = QueueScheduler::new(config.clone());
        scheduler.open(CrawlContext::new("test")).await.unwrap();
        for path in ["a", "b", "c"] {
            let url = format!("https://example.com/{}", path);
            scheduler.enqueue(get(&url)).await.unwrap();
        }
        scheduler.close("pause").await.unwrap();
    }
    corrupt_second_frame(
        &dir.path()
            .join(crate::backends::QUEUE_DIR)
            .join("main")
            .join("q.dat"),
    );

    let stats = Arc::new(MemoryStatsCollector::new());
    let scheduler = QueueScheduler::new(config).with_stats(stats.clone());
    scheduler.open(CrawlContext::new("test")).await.unwrap();
    assert_eq!(scheduler.size().await.unwrap(), 3);
    assert_eq!(drain_urls(&scheduler).await, expected);
    assert_eq!(stats.get_value("scheduler/unserializable"), Some(1));
    assert_eq!(stats.get_value("scheduler/dequeued/disk"), Some(2));
    scheduler.close("finished").await.unwrap();
}

#[tokio::test]
async fn test_corrupt_disk_fifo_record_is_skipped() {
    corrupt_disk_record_is_skipped(
        QueueKind::DiskFifo,
        vec!["https://example.com/a", "https://example.com/c"],
    )
    .await;
}

#[tokio::test]
async fn test_corrupt_disk_lifo_record_is_skipped() {
    corrupt_disk_record_is_skipped(
        QueueKind::DiskLifo,
        vec!["https://example.com/c", "https://example.com/a"],
    )
    .await;
}

use crawlq_core::async_trait;
use crawlq_core::context::CrawlContext;
use crawlq_core::error::Result;
use crawlq_core::request::Request;

/// Trait for request schedulers
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Bind the scheduler to a crawl and open its storage
    async fn open(&self, context: CrawlContext) -> Result<()>;

    /// Release storage; safe after a failed or missing `open`
    async fn close(&self, reason: &str) -> Result<()>;

    /// Add a request; `false` when it was dropped as a duplicate or could not be stored
    async fn enqueue(&self, request: Request) -> Result<bool>;

    /// Get the next request, `None` when nothing is available
    async fn dequeue(&self) -> Result<Option<Request>>;

    /// Number of pending requests (broker-reported for broker queues)
    async fn size(&self) -> Result<usize>;

    /// Whether any request is pending
    async fn has_pending_work(&self) -> Result<bool> {
        Ok(self.size().await? > 0)
    }
}

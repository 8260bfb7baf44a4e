use crawlq_core::async_trait;
use crawlq_core::context::CrawlContext;
use crawlq_core::error::Result;
use crawlq_core::record::{peek_url, JsonSerializer, RecordSerializer};
use crawlq_core::request::Request;

use crate::QueueBackend;

/// Makes a byte-record queue hold requests.
///
/// Requests are encoded on push and decoded on pop with the crawl's
/// callback registry. A record that fails to decode is still consumed
/// (and acknowledged), and the failure is returned for that pop only.
pub struct SerializingQueue<Q, S = JsonSerializer> {
    inner: Q,
    serializer: S,
    context: CrawlContext,
    route_by_callback: bool,
}

impl<Q: QueueBackend<Vec<u8>>> SerializingQueue<Q, JsonSerializer> {
    /// Wrap `inner` using the JSON record format
    pub fn new(inner: Q, context: CrawlContext) -> Self {
        Self::with_serializer(inner, JsonSerializer, context)
    }
}

impl<Q: QueueBackend<Vec<u8>>, S: RecordSerializer> SerializingQueue<Q, S> {
    /// Wrap `inner` using a custom serializer
    pub fn with_serializer(inner: Q, serializer: S, context: CrawlContext) -> Self {
        Self {
            inner,
            serializer,
            context,
            route_by_callback: false,
        }
    }

    /// Send requests to the queue named after their callback's module
    /// when the backend can route
    pub fn route_by_callback(mut self, enabled: bool) -> Self {
        self.route_by_callback = enabled;
        self
    }

    /// The wrapped queue
    pub fn inner(&self) -> &Q {
        &self.inner
    }

    fn route_for(&self, request: &Request) -> Option<String> {
        if !self.route_by_callback || !self.inner.supports_routing() {
            return None;
        }
        let component = &request.callback()?.reference().component;
        if component.path.is_empty() {
            Some(component.name.clone())
        } else {
            Some(component.path.clone())
        }
    }
}

#[async_trait]
impl<Q, S> QueueBackend<Request> for SerializingQueue<Q, S>
where
    Q: QueueBackend<Vec<u8>>,
    S: RecordSerializer,
{
    async fn push(&self, item: Request) -> Result<()> {
        let bytes = self
            .serializer
            .serialize(&item)
            .map_err(|e| e.with_url(item.url().as_str()))?;

        match self.route_for(&item) {
            Some(queue) => self.inner.push_to(bytes, &queue).await,
            None => self.inner.push(bytes).await,
        }
    }

    async fn pop(&self) -> Result<Option<Request>> {
        let bytes = match self.inner.pop().await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let decoded = self.serializer.deserialize(&bytes, &self.context);
        self.inner.ack(&bytes).await?;

        match decoded {
            Ok(request) => Ok(Some(request)),
            Err(e) => {
                let e = e.with_spider_name(self.context.spider_name());
                match peek_url(&bytes) {
                    Some(url) => Err(e.with_url(url)),
                    None => Err(e),
                }
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn supports_routing(&self) -> bool {
        self.inner.supports_routing()
    }
}

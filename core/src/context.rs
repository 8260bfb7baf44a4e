use std::sync::Arc;

use crate::callback::CallbackRegistry;

/// The crawl a scheduler is bound to.
///
/// Carries the spider identity used to namespace queues and the registry
/// used to resolve deferred callbacks read back from storage.
#[derive(Debug, Clone)]
pub struct CrawlContext {
    spider_name: String,
    queue_name: Option<String>,
    registry: Arc<CallbackRegistry>,
}

impl CrawlContext {
    /// Create a context for a spider with an empty callback registry
    pub fn new<S: Into<String>>(spider_name: S) -> Self {
        Self {
            spider_name: spider_name.into(),
            queue_name: None,
            registry: Arc::new(CallbackRegistry::new()),
        }
    }

    /// Use an explicit queue name instead of the spider name
    pub fn with_queue_name<S: Into<String>>(mut self, queue_name: S) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    /// Use the given callback registry
    pub fn with_registry(mut self, registry: CallbackRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// The spider's identifying name
    pub fn spider_name(&self) -> &str {
        &self.spider_name
    }

    /// Name of the queue this crawl reads from and writes to
    pub fn queue_name(&self) -> &str {
        self.queue_name.as_deref().unwrap_or(&self.spider_name)
    }

    /// The callback registry
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }
}

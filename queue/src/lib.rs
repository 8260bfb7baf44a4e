//! Queue backends for the crawlq scheduler.
//!
//! Every backend implements [`QueueBackend`]. The memory queues hold live
//! values; disk and broker queues hold encoded records and are made
//! request-aware by wrapping them in a [`SerializingQueue`]. A
//! [`PriorityQueue`] composes one sub-queue per priority level.

use crawlq_core::async_trait;
use crawlq_core::error::Result;
use crawlq_core::request::Request;

pub mod broker;
pub mod disk;
pub mod memory;
pub mod priority;
pub mod serializing;

pub use broker::{Broker, BrokerQueue, Delivery, MemoryBroker, RedisBroker};
pub use disk::{FifoDiskQueue, LifoDiskQueue};
pub use memory::{FifoMemoryQueue, LifoMemoryQueue};
pub use priority::PriorityQueue;
pub use serializing::SerializingQueue;

/// Common capability set of all queue backends
#[async_trait]
pub trait QueueBackend<T: Send + Sync + 'static>: Send + Sync {
    /// Add an item
    async fn push(&self, item: T) -> Result<()>;

    /// Remove and return the next item, `None` when nothing is available
    async fn pop(&self) -> Result<Option<T>>;

    /// Number of items currently held (may be approximate for brokers)
    async fn len(&self) -> Result<usize>;

    /// Whether the queue currently holds nothing
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Release resources; the queue must not be used afterwards
    async fn close(&self) -> Result<()>;

    /// Whether [`QueueBackend::push_to`] reaches a queue other than this one
    fn supports_routing(&self) -> bool {
        false
    }

    /// Add an item to a named sibling queue
    async fn push_to(&self, item: T, _queue: &str) -> Result<()> {
        self.push(item).await
    }

    /// Confirm that a popped item was taken over by the consumer
    async fn ack(&self, _item: &T) -> Result<()> {
        Ok(())
    }
}

/// Items that carry their own scheduling priority
pub trait Prioritized {
    /// Higher values are popped first
    fn priority(&self) -> i32;
}

impl Prioritized for Request {
    fn priority(&self) -> i32 {
        Request::priority(self)
    }
}

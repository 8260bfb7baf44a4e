//! Queues held by an external message broker.
//!
//! A [`Broker`] is the minimal surface a scheduler needs from a broker:
//! declare, publish, get with manual acknowledgement, and a message count.
//! [`BrokerQueue`] adapts a broker to [`QueueBackend`] for one named
//! queue, with lazy declaration of the sibling queues it routes to.

use std::collections::HashSet;
use std::sync::Arc;

use crawlq_core::async_trait;
use crawlq_core::error::Result;
use tokio::sync::Mutex;

use crate::QueueBackend;

mod memory;
mod redis;

pub use memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// A message taken from a broker queue but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message was taken from
    pub queue: String,

    /// Message body
    pub payload: Vec<u8>,
}

/// Operations the scheduler uses on a message broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make sure a durable queue exists
    async fn declare(&self, queue: &str) -> Result<()>;

    /// Append a message to a queue
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Take the next message; it stays owned by this consumer until acked
    async fn get(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Confirm that a delivery was handled
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Number of messages waiting in a queue
    async fn message_count(&self, queue: &str) -> Result<usize>;

    /// Return unacknowledged deliveries of a queue to it, returning how many
    async fn recover(&self, queue: &str) -> Result<usize>;

    /// Release the connection
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn declare(&self, queue: &str) -> Result<()> {
        (**self).declare(queue).await
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        (**self).publish(queue, payload).await
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        (**self).get(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        (**self).ack(delivery).await
    }

    async fn message_count(&self, queue: &str) -> Result<usize> {
        (**self).message_count(queue).await
    }

    async fn recover(&self, queue: &str) -> Result<usize> {
        (**self).recover(queue).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// One named broker queue seen as a [`QueueBackend`]
pub struct BrokerQueue<B> {
    broker: B,
    queue: String,
    declared: Mutex<HashSet<String>>,
}

impl<B: Broker> BrokerQueue<B> {
    /// Bind to `queue`, declaring it
    pub async fn open<S: Into<String>>(broker: B, queue: S) -> Result<Self> {
        let queue = queue.into();
        broker.declare(&queue).await?;
        let mut declared = HashSet::new();
        declared.insert(queue.clone());

        Ok(Self {
            broker,
            queue,
            declared: Mutex::new(declared),
        })
    }

    /// Name of the queue this adapter consumes from
    pub fn name(&self) -> &str {
        &self.queue
    }

    /// The underlying broker
    pub fn broker(&self) -> &B {
        &self.broker
    }

    async fn ensure_declared(&self, queue: &str) -> Result<()> {
        let mut declared = self.declared.lock().await;
        if !declared.contains(queue) {
            self.broker.declare(queue).await?;
            log::debug!("Declared broker queue {}", queue);
            declared.insert(queue.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl<B: Broker> QueueBackend<Vec<u8>> for BrokerQueue<B> {
    async fn push(&self, item: Vec<u8>) -> Result<()> {
        self.broker.publish(&self.queue, item).await
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.broker.get(&self.queue).await?.map(|delivery| delivery.payload))
    }

    async fn len(&self) -> Result<usize> {
        self.broker.message_count(&self.queue).await
    }

    async fn close(&self) -> Result<()> {
        self.broker.close().await
    }

    fn supports_routing(&self) -> bool {
        true
    }

    async fn push_to(&self, item: Vec<u8>, queue: &str) -> Result<()> {
        self.ensure_declared(queue).await?;
        self.broker.publish(queue, item).await
    }

    async fn ack(&self, item: &Vec<u8>) -> Result<()> {
        let delivery = Delivery {
            queue: self.queue.clone(),
            payload: item.clone(),
        };
        self.broker.ack(&delivery).await
    }
}

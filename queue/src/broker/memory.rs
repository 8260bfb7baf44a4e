use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crawlq_core::async_trait;
use crawlq_core::error::{Error, Result};
use tokio::sync::Mutex;

use super::{Broker, Delivery};

#[derive(Default)]
struct BrokerState {
    ready: HashMap<String, VecDeque<Vec<u8>>>,
    unacked: HashMap<String, Vec<Vec<u8>>>,
    declare_calls: usize,
}

/// In-process broker.
///
/// Clones share the same queues, so several schedulers in one process
/// behave like consumers of a shared remote queue. Publishing to a queue
/// that was never declared fails, like a broker rejecting an unroutable
/// message.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create a broker with no queues
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `declare` was called
    pub async fn declare_calls(&self) -> usize {
        self.state.lock().await.declare_calls
    }

    /// Deliveries taken from `queue` and not acknowledged
    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .unacked
            .get(queue)
            .map_or(0, Vec::len)
    }
}

fn undeclared(queue: &str) -> Error {
    Error::broker(format!("Queue {} is not declared", queue))
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.declare_calls += 1;
        state.ready.entry(queue.to_string()).or_default();
        state.unacked.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .ready
            .get_mut(queue)
            .ok_or_else(|| undeclared(queue))?
            .push_back(payload);
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let payload = match state.ready.get_mut(queue) {
            Some(ready) => ready.pop_front(),
            None => return Err(undeclared(queue)),
        };

        Ok(payload.map(|payload| {
            state
                .unacked
                .entry(queue.to_string())
                .or_default()
                .push(payload.clone());
            Delivery {
                queue: queue.to_string(),
                payload,
            }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(unacked) = state.unacked.get_mut(&delivery.queue) {
            if let Some(index) = unacked.iter().position(|p| *p == delivery.payload) {
                unacked.remove(index);
            }
        }
        Ok(())
    }

    async fn message_count(&self, queue: &str) -> Result<usize> {
        let state = self.state.lock().await;
        state
            .ready
            .get(queue)
            .map(VecDeque::len)
            .ok_or_else(|| undeclared(queue))
    }

    async fn recover(&self, queue: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let unacked = state.unacked.remove(queue).unwrap_or_default();
        let count = unacked.len();
        let ready = state
            .ready
            .get_mut(queue)
            .ok_or_else(|| undeclared(queue))?;
        for payload in unacked.into_iter().rev() {
            ready.push_front(payload);
        }
        Ok(count)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

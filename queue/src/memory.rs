use std::collections::VecDeque;

use crawlq_core::async_trait;
use crawlq_core::error::Result;
use tokio::sync::Mutex;

use crate::QueueBackend;

/// In-memory queue popping in insertion order
pub struct FifoMemoryQueue<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> FifoMemoryQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> Default for FifoMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> QueueBackend<T> for FifoMemoryQueue<T> {
    async fn push(&self, item: T) -> Result<()> {
        self.queue.lock().await.push_back(item);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<T>> {
        Ok(self.queue.lock().await.pop_front())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.queue.lock().await.len())
    }

    async fn close(&self) -> Result<()> {
        self.queue.lock().await.clear();
        Ok(())
    }
}

/// In-memory queue popping in reverse insertion order (a stack)
pub struct LifoMemoryQueue<T> {
    stack: Mutex<Vec<T>>,
}

impl<T> LifoMemoryQueue<T> {
    /// Create an empty stack
    pub fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Default for LifoMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> QueueBackend<T> for LifoMemoryQueue<T> {
    async fn push(&self, item: T) -> Result<()> {
        self.stack.lock().await.push(item);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<T>> {
        Ok(self.stack.lock().await.pop())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.stack.lock().await.len())
    }

    async fn close(&self) -> Result<()> {
        self.stack.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlq_core::request::Request;

    #[tokio::test]
    async fn test_fifo_memory_queue() {
        let queue = FifoMemoryQueue::new();

        let req1 = Request::get("https://example.com/1").unwrap();
        let req2 = Request::get("https://example.com/2").unwrap();
        let req3 = Request::get("https://example.com/3").unwrap();

        queue.push(req1).await.unwrap();
        queue.push(req2).await.unwrap();
        queue.push(req3).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);

        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.url().as_str(), "https://example.com/1");
        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.url().as_str(), "https://example.com/2");
        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.url().as_str(), "https://example.com/3");

        assert!(queue.is_empty().await.unwrap());
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifo_memory_queue() {
        let queue = LifoMemoryQueue::new();

        for i in 1..=3 {
            let req = Request::get(format!("https://example.com/{}", i)).unwrap();
            queue.push(req).await.unwrap();
        }

        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.url().as_str(), "https://example.com/3");
        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.url().as_str(), "https://example.com/2");
        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.url().as_str(), "https://example.com/1");

        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_queue_has_no_routing() {
        let queue: FifoMemoryQueue<u32> = FifoMemoryQueue::new();
        assert!(!queue.supports_routing());

        queue.push_to(7, "elsewhere").await.unwrap();
        assert_eq!(queue.pop().await.unwrap(), Some(7));

        queue.push(8).await.unwrap();
        queue.close().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}

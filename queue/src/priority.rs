use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crawlq_core::async_trait;
use crawlq_core::error::{Error, Result};
use tokio::sync::Mutex;

use crate::disk::write_atomic;
use crate::{Prioritized, QueueBackend};

/// Builds the sub-queue for one priority level
pub type QueueFactory<Q> = Box<dyn Fn(i32) -> Result<Q> + Send + Sync>;

/// One sub-queue per priority level; the highest priority pops first.
///
/// Sub-queues are created on first push and closed as soon as they run
/// empty. With a state file, the set of active priorities is rewritten
/// whenever a level appears or goes away, so the sub-queues are reopened
/// on the next start even when the process stopped without `close`.
pub struct PriorityQueue<Q> {
    factory: QueueFactory<Q>,
    queues: Mutex<BTreeMap<i32, Q>>,
    state_file: Option<PathBuf>,
}

impl<Q> PriorityQueue<Q> {
    /// Create an empty priority queue with no persisted state
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(i32) -> Result<Q> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            queues: Mutex::new(BTreeMap::new()),
            state_file: None,
        }
    }

    /// Create a priority queue whose active levels are kept in `state_file`
    pub fn open<F>(factory: F, state_file: PathBuf) -> Result<Self>
    where
        F: Fn(i32) -> Result<Q> + Send + Sync + 'static,
    {
        let priorities: Vec<i32> = if state_file.exists() {
            serde_json::from_slice(&fs::read(&state_file)?).map_err(|e| {
                Error::config(format!(
                    "Corrupt priority state {}: {}",
                    state_file.display(),
                    e
                ))
            })?
        } else {
            Vec::new()
        };

        let mut queues = BTreeMap::new();
        for priority in priorities {
            queues.insert(priority, factory(priority)?);
        }
        if !queues.is_empty() {
            log::debug!("Resuming priority levels {:?}", queues.keys().collect::<Vec<_>>());
        }

        Ok(Self {
            factory: Box::new(factory),
            queues: Mutex::new(queues),
            state_file: Some(state_file),
        })
    }

    /// Priority levels that currently have a sub-queue, lowest first
    pub async fn priorities(&self) -> Vec<i32> {
        self.queues.lock().await.keys().copied().collect()
    }

    fn save_levels(&self, priorities: &[i32]) -> Result<()> {
        let state_file = match &self.state_file {
            Some(state_file) => state_file,
            None => return Ok(()),
        };
        if priorities.is_empty() {
            if state_file.exists() {
                fs::remove_file(state_file)?;
            }
        } else {
            write_atomic(state_file, &serde_json::to_vec(priorities)?)?;
        }
        Ok(())
    }
}

fn levels<Q>(queues: &BTreeMap<i32, Q>) -> Vec<i32> {
    queues.keys().copied().collect()
}

#[async_trait]
impl<T, Q> QueueBackend<T> for PriorityQueue<Q>
where
    T: Prioritized + Send + Sync + 'static,
    Q: QueueBackend<T>,
{
    async fn push(&self, item: T) -> Result<()> {
        let priority = item.priority();
        let mut queues = self.queues.lock().await;
        if !queues.contains_key(&priority) {
            queues.insert(priority, (self.factory)(priority)?);
            self.save_levels(&levels(&queues))?;
        }
        match queues.get(&priority) {
            Some(queue) => queue.push(item).await,
            None => Err(Error::scheduler(format!("No queue for priority {}", priority))),
        }
    }

    async fn pop(&self) -> Result<Option<T>> {
        let mut queues = self.queues.lock().await;
        loop {
            let (priority, queue) = match queues.iter().next_back() {
                Some((priority, queue)) => (*priority, queue),
                None => return Ok(None),
            };

            let popped = queue.pop().await;
            let drained = queue.is_empty().await?;
            if drained {
                if let Some(queue) = queues.remove(&priority) {
                    queue.close().await?;
                }
                self.save_levels(&levels(&queues))?;
            }

            match popped {
                Ok(None) if drained => continue,
                other => return other,
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        let queues = self.queues.lock().await;
        let mut total = 0;
        for queue in queues.values() {
            total += queue.len().await?;
        }
        Ok(total)
    }

    async fn close(&self) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let mut pending = Vec::new();
        for (priority, queue) in std::mem::take(&mut *queues) {
            if queue.len().await? > 0 {
                pending.push(priority);
            }
            queue.close().await?;
        }
        self.save_levels(&pending)
    }
}

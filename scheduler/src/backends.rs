use std::path::{Path, PathBuf};
use std::sync::Arc;

use crawlq_core::context::CrawlContext;
use crawlq_core::error::{Error, Result};
use crawlq_core::request::Request;
use crawlq_queue::{
    Broker, BrokerQueue, FifoDiskQueue, FifoMemoryQueue, LifoDiskQueue, LifoMemoryQueue,
    PriorityQueue, QueueBackend, RedisBroker, SerializingQueue,
};

use crate::types::{QueueKind, SchedulerConfig};

/// Directory under the job directory holding the request queues
pub const QUEUE_DIR: &str = "requests.queue";

/// Priority levels saved on close
pub const ACTIVE_FILE: &str = "active.json";

/// Boxed request queue as held by a scheduler
pub type RequestQueue = Box<dyn QueueBackend<Request>>;

fn memory_queue<Q, F>(priority: bool, make: F) -> RequestQueue
where
    Q: QueueBackend<Request> + 'static,
    F: Fn() -> Q + Send + Sync + 'static,
{
    if priority {
        Box::new(PriorityQueue::new(move |_| Ok(make())))
    } else {
        Box::new(make())
    }
}

fn disk_queue<D, F>(
    base: PathBuf,
    priority: bool,
    context: &CrawlContext,
    open: F,
) -> Result<RequestQueue>
where
    D: QueueBackend<Vec<u8>> + 'static,
    F: Fn(&Path) -> Result<D> + Send + Sync + 'static,
{
    if priority {
        let state_file = base.join(ACTIVE_FILE);
        let context = context.clone();
        let queue = PriorityQueue::open(
            move |level| {
                let raw = open(&base.join(format!("p{}", level)))?;
                Ok(SerializingQueue::new(raw, context.clone()))
            },
            state_file,
        )?;
        Ok(Box::new(queue))
    } else {
        let raw = open(&base.join("main"))?;
        Ok(Box::new(SerializingQueue::new(raw, context.clone())))
    }
}

/// Build the request queue described by `config` for a crawl
pub async fn build_queue(
    config: &SchedulerConfig,
    context: &CrawlContext,
    broker: Option<Arc<dyn Broker>>,
) -> Result<RequestQueue> {
    config.validate()?;

    let base = || -> Result<PathBuf> {
        config
            .jobdir
            .as_ref()
            .map(|jobdir| jobdir.join(QUEUE_DIR))
            .ok_or_else(|| Error::config(format!("Queue kind {} requires a job directory", config.queue)))
    };

    match config.queue {
        QueueKind::MemoryFifo => Ok(memory_queue(config.priority, FifoMemoryQueue::<Request>::new)),
        QueueKind::MemoryLifo => Ok(memory_queue(config.priority, LifoMemoryQueue::<Request>::new)),
        QueueKind::DiskFifo => disk_queue(base()?, config.priority, context, |path| {
            FifoDiskQueue::open(path)
        }),
        QueueKind::DiskLifo => disk_queue(base()?, config.priority, context, |path| {
            LifoDiskQueue::open(path)
        }),
        QueueKind::Broker => {
            let broker: Arc<dyn Broker> = match broker {
                Some(broker) => broker,
                None => Arc::new(RedisBroker::connect(&config.broker_url).await?),
            };
            let queue = BrokerQueue::open(broker, context.queue_name()).await?;
            Ok(Box::new(
                SerializingQueue::new(queue, context.clone())
                    .route_by_callback(config.route_by_callback),
            ))
        }
    }
}

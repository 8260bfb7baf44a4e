use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, RedisError};
use crawlq_core::async_trait;
use crawlq_core::error::{Error, Result};

use super::{Broker, Delivery};

/// Set holding the name of every queue declared through crawlq
pub const QUEUES_KEY: &str = "crawlq:queues";

fn broker_error(e: RedisError) -> Error {
    Error::broker(e.to_string())
}

fn unacked_key(queue: &str) -> String {
    format!("{}:unacked", queue)
}

/// Broker backed by Redis lists.
///
/// A queue is a list fed with `LPUSH`. `get` moves the next message into
/// `<queue>:unacked` with `RPOPLPUSH`, and `ack` removes it from there, so
/// a consumer that dies mid-request leaves its message recoverable.
#[derive(Clone)]
pub struct RedisBroker {
    connection: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect to the Redis server at `url`, e.g. `redis://127.0.0.1/`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(broker_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(broker_error)?;
        log::info!("Connected to redis broker");
        Ok(Self { connection })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn declare(&self, queue: &str) -> Result<()> {
        let mut con = self.connection.clone();
        con.sadd::<_, _, ()>(QUEUES_KEY, queue)
            .await
            .map_err(broker_error)
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let mut con = self.connection.clone();
        con.lpush::<_, _, ()>(queue, payload)
            .await
            .map_err(broker_error)
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut con = self.connection.clone();
        let payload: Option<Vec<u8>> = con
            .rpoplpush(queue, unacked_key(queue))
            .await
            .map_err(broker_error)?;

        Ok(payload.map(|payload| Delivery {
            queue: queue.to_string(),
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut con = self.connection.clone();
        con.lrem::<_, _, ()>(unacked_key(&delivery.queue), 1, delivery.payload.as_slice())
            .await
            .map_err(broker_error)
    }

    async fn message_count(&self, queue: &str) -> Result<usize> {
        let mut con = self.connection.clone();
        con.llen(queue).await.map_err(broker_error)
    }

    async fn recover(&self, queue: &str) -> Result<usize> {
        let mut con = self.connection.clone();
        let unacked = unacked_key(queue);
        let mut count = 0;
        loop {
            let moved: Option<Vec<u8>> = con
                .rpoplpush(&unacked, queue)
                .await
                .map_err(broker_error)?;
            if moved.is_none() {
                break;
            }
            count += 1;
        }
        if count > 0 {
            log::info!("Returned {} unacknowledged messages to {}", count, queue);
        }
        Ok(count)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

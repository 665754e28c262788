//! Redis transport

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue, RedisError};
use tracing::debug;

use super::store::{Connection, StoreError};
use crate::resource_pool::Manager;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.code() == Some("WRONGTYPE") {
            return StoreError::WrongType(err.to_string());
        }
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Opens Redis connections for a [`ResourcePool`](crate::ResourcePool)
///
/// Accepts `redis://[user:pass@]host:port/db`, `rediss://` and
/// `unix:///path/to/redis.sock` addresses.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    /// Parse the address; no connection is opened yet
    pub fn new(uri: &str) -> Result<Self, StoreError> {
        let client = Client::open(uri).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Manager for RedisConnector {
    type Resource = RedisConnection;

    async fn create(&self) -> Result<RedisConnection, StoreError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!("Opened Redis connection");
        Ok(RedisConnection { conn })
    }
}

/// One Redis connection
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

impl RedisConnection {
    async fn query<T: FromRedisValue + Send>(&mut self, cmd: &redis::Cmd) -> Result<T, StoreError> {
        let value: T = cmd.query_async(&mut self.conn).await?;
        Ok(value)
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn lpop(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.query(redis::cmd("LPOP").arg(key)).await
    }

    async fn rpush(&mut self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    async fn lrange(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn llen(&mut self, key: &str) -> Result<usize, StoreError> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn del(&mut self, key: &str) -> Result<(), StoreError> {
        self.query::<i64>(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn incr(&mut self, key: &str) -> Result<i64, StoreError> {
        self.query(redis::cmd("INCR").arg(key)).await
    }

    async fn sadd(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        self.query::<i64>(redis::cmd("SADD").arg(key).arg(member))
            .await?;
        Ok(())
    }

    async fn srem(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        self.query::<i64>(redis::cmd("SREM").arg(key).arg(member))
            .await?;
        Ok(())
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        self.query(redis::cmd("SMEMBERS").arg(key)).await
    }
}

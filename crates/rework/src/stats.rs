//! Read-only inspection of counters, live workers and failures

use serde::Serialize;
use tracing::warn;

use crate::codec::{self, CodecError, Failure, WorkStatus};
use crate::keys::Keys;
use crate::persistence::{Connection, StoreError};
use crate::resource_pool::{Manager, PoolError, Pooled, ResourcePool};

/// Inspection errors
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Codec(#[from] CodecError),

    #[error("counter {key} holds a non-integer value: {value}")]
    InvalidCounter { key: String, value: String },
}

/// A registered worker and what it is running, if anything
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub status: Option<WorkStatus>,
}

/// Totals for the whole namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub processed: u64,
    pub failed: u64,
    pub workers: usize,
    pub failures_recorded: usize,
}

/// Reads the records workers maintain
pub struct Stats<M: Manager> {
    pool: ResourcePool<M>,
    keys: Keys,
}

impl<M: Manager> Clone for Stats<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<M> Stats<M>
where
    M: Manager,
    M::Resource: Connection,
{
    pub fn new(pool: ResourcePool<M>, keys: Keys) -> Self {
        Self { pool, keys }
    }

    /// Jobs completed successfully across all workers
    pub async fn processed(&self) -> Result<u64, StatsError> {
        self.counter(&self.keys.processed()).await
    }

    /// Jobs failed across all workers
    pub async fn failed(&self) -> Result<u64, StatsError> {
        self.counter(&self.keys.failed_count()).await
    }

    /// Jobs completed successfully by one worker
    pub async fn processed_by(&self, worker: &str) -> Result<u64, StatsError> {
        self.counter(&self.keys.processed_by(worker)).await
    }

    /// Registered workers with their current status record
    pub async fn workers(&self) -> Result<Vec<WorkerInfo>, StatsError> {
        let mut conn = self.pool.acquire().await?;
        let listed = conn.smembers(&self.keys.workers()).await;
        let ids = conn.check(listed)?;

        let mut workers = Vec::with_capacity(ids.len());
        for id in ids {
            let fetched = conn.get(&self.keys.worker(&id)).await;
            let status = match conn.check(fetched)? {
                Some(raw) => match codec::decode::<WorkStatus>(&raw) {
                    Ok(status) => Some(status),
                    Err(err) => {
                        warn!(worker = %id, error = %err, "Unreadable worker status");
                        None
                    }
                },
                None => None,
            };
            workers.push(WorkerInfo { id, status });
        }
        Ok(workers)
    }

    /// Up to `limit` failure records starting at `offset`, oldest first
    pub async fn failures(&self, offset: usize, limit: usize) -> Result<Vec<Failure>, StatsError> {
        // Offsets past isize::MAX lie beyond any list
        let Ok(start) = isize::try_from(offset) else {
            return Ok(vec![]);
        };
        if limit == 0 {
            return Ok(vec![]);
        }
        let stop = offset
            .checked_add(limit - 1)
            .and_then(|stop| isize::try_from(stop).ok())
            .unwrap_or(isize::MAX);

        let mut conn = self.pool.acquire().await?;
        let fetched = conn.lrange(&self.keys.failed(), start, stop).await;
        let raw = conn.check(fetched)?;
        drop(conn);

        raw.iter()
            .map(|entry| Ok(codec::decode::<Failure>(entry)?))
            .collect()
    }

    /// Number of failure records
    pub async fn failure_count(&self) -> Result<usize, StatsError> {
        let mut conn = self.pool.acquire().await?;
        let len = conn.llen(&self.keys.failed()).await;
        Ok(conn.check(len)?)
    }

    /// Number of jobs waiting in a queue
    pub async fn queue_length(&self, queue: &str) -> Result<usize, StatsError> {
        let mut conn = self.pool.acquire().await?;
        let len = conn.llen(&self.keys.queue(queue)).await;
        Ok(conn.check(len)?)
    }

    /// Counters, worker count and failure count in one call
    pub async fn summary(&self) -> Result<Summary, StatsError> {
        let mut conn = self.pool.acquire().await?;
        let processed = read_counter(&mut conn, &self.keys.processed()).await?;
        let failed = read_counter(&mut conn, &self.keys.failed_count()).await?;
        let listed = conn.smembers(&self.keys.workers()).await;
        let workers = conn.check(listed)?.len();
        let len = conn.llen(&self.keys.failed()).await;
        let failures_recorded = conn.check(len)?;

        Ok(Summary {
            processed,
            failed,
            workers,
            failures_recorded,
        })
    }

    async fn counter(&self, key: &str) -> Result<u64, StatsError> {
        let mut conn = self.pool.acquire().await?;
        read_counter(&mut conn, key).await
    }
}

/// Missing counters read as zero
async fn read_counter<M>(conn: &mut Pooled<M>, key: &str) -> Result<u64, StatsError>
where
    M: Manager,
    M::Resource: Connection,
{
    let fetched = conn.get(key).await;
    match conn.check(fetched)? {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| StatsError::InvalidCounter {
            key: key.to_string(),
            value,
        }),
    }
}

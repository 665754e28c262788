//! Worker identity and the status records it maintains in the store

use std::fmt;

use chrono::Utc;
use tracing::debug;

use crate::codec::{self, CodecError, Failure, Job, WorkStatus};
use crate::keys::Keys;
use crate::persistence::{Connection, StoreError};
use crate::registry::{JobError, JobResult};
use crate::resource_pool::PoolError;

/// Errors from best-effort status writes
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Codec(#[from] CodecError),
}

impl StatusError {
    /// Whether the connection in use should be discarded
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transport())
    }
}

/// Resque worker identity, rendered as `hostname:pid-index:queue1,queue2`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
    hostname: String,
    pid: u32,
    index: usize,
    queues: Vec<String>,
}

impl WorkerId {
    /// Identity for worker `index` of this process
    pub fn new(index: usize, queues: Vec<String>) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self::with_host(hostname, std::process::id(), index, queues)
    }

    pub fn with_host(
        hostname: impl Into<String>,
        pid: u32,
        index: usize,
        queues: Vec<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            index,
            queues,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.hostname,
            self.pid,
            self.index,
            self.queues.join(",")
        )
    }
}

/// One worker's view of its own store records
///
/// Every operation runs against a connection the caller has checked out.
#[derive(Debug, Clone)]
pub struct Process {
    id: WorkerId,
    name: String,
    keys: Keys,
}

impl Process {
    pub fn new(id: WorkerId, keys: Keys) -> Self {
        let name = id.to_string();
        Self { id, name, keys }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// The rendered worker id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register in the live worker set and reset per-worker counters
    pub async fn open<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<(), StatusError> {
        conn.sadd(&self.keys.workers(), &self.name).await?;
        conn.set(&self.keys.processed_by(&self.name), "0").await?;
        conn.set(&self.keys.failed_by(&self.name), "0").await?;
        debug!(worker = %self.name, "Worker registered");
        Ok(())
    }

    /// Remove every record this worker owns
    pub async fn close<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<(), StatusError> {
        conn.srem(&self.keys.workers(), &self.name).await?;
        conn.del(&self.keys.worker(&self.name)).await?;
        conn.del(&self.keys.worker_started(&self.name)).await?;
        conn.del(&self.keys.processed_by(&self.name)).await?;
        conn.del(&self.keys.failed_by(&self.name)).await?;
        debug!(worker = %self.name, "Worker unregistered");
        Ok(())
    }

    /// Publish the status record for a job about to run
    pub async fn start<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        job: &Job,
    ) -> Result<(), StatusError> {
        let status = WorkStatus {
            queue: job.queue.clone(),
            run_at: Utc::now(),
            payload: job.payload.clone(),
        };
        let record = codec::encode(&status)?;

        conn.set(&self.keys.worker(&self.name), &record).await?;
        conn.set(
            &self.keys.worker_started(&self.name),
            &status.run_at.to_rfc3339(),
        )
        .await?;
        Ok(())
    }

    /// Record the outcome of a job and clear the status record
    pub async fn finish<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        job: &Job,
        result: &JobResult,
    ) -> Result<(), StatusError> {
        match result {
            Ok(()) => self.succeed(conn).await?,
            Err(err) => self.fail(conn, job, err).await?,
        }
        conn.del(&self.keys.worker(&self.name)).await?;
        conn.del(&self.keys.worker_started(&self.name)).await?;
        Ok(())
    }

    async fn succeed<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<(), StatusError> {
        conn.incr(&self.keys.processed()).await?;
        conn.incr(&self.keys.processed_by(&self.name)).await?;
        Ok(())
    }

    async fn fail<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        job: &Job,
        err: &JobError,
    ) -> Result<(), StatusError> {
        let failure = Failure {
            failed_at: Utc::now(),
            payload: job.payload.clone(),
            exception: err.exception.clone(),
            error: err.message.clone(),
            worker: self.name.clone(),
            queue: job.queue.clone(),
        };
        let record = codec::encode(&failure)?;

        conn.rpush(&self.keys.failed(), &record).await?;
        conn.incr(&self.keys.failed_count()).await?;
        conn.incr(&self.keys.failed_by(&self.name)).await?;
        Ok(())
    }
}

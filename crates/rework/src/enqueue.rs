//! Producer side: push job envelopes onto queues

use serde_json::Value;
use tracing::{debug, info, instrument, Span};

use crate::codec::{self, CodecError, Payload};
use crate::keys::Keys;
use crate::persistence::{Connection, StoreError};
use crate::resource_pool::{Manager, PoolError, ResourcePool};

/// Enqueue errors
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("queue name must not be empty")]
    EmptyQueue,

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Codec(#[from] CodecError),
}

/// What an enqueue call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was pushed; `length` is the queue length afterwards
    Enqueued { length: usize },

    /// An identical job was already waiting, nothing was pushed
    Duplicate,
}

/// Pushes jobs onto queues
///
/// Cloning is cheap and shares the underlying pool.
pub struct Enqueuer<M: Manager> {
    pool: ResourcePool<M>,
    keys: Keys,
}

impl<M: Manager> Clone for Enqueuer<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<M> Enqueuer<M>
where
    M: Manager,
    M::Resource: Connection,
{
    pub fn new(pool: ResourcePool<M>, keys: Keys) -> Self {
        Self { pool, keys }
    }

    /// Push `{class, args}` onto the tail of `queue`
    ///
    /// With `dedupe`, the queue is scanned first and the push is skipped if an
    /// entry with the same class and arguments is already waiting. The scan
    /// and the push are not atomic, so concurrent producers can still race a
    /// duplicate in.
    #[instrument(skip(self, args), fields(args = tracing::field::Empty))]
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        dedupe: bool,
    ) -> Result<EnqueueOutcome, EnqueueError> {
        if queue.is_empty() {
            return Err(EnqueueError::EmptyQueue);
        }
        let payload = Payload::new(class, args);
        Span::current().record("args", payload.args_signature().as_str());
        let raw = codec::encode_payload(&payload)?;
        let key = self.keys.queue(queue);

        let mut conn = self.pool.acquire().await?;

        if dedupe {
            let scan = conn.lrange(&key, 0, -1).await;
            let waiting = conn.check(scan)?;
            if contains_job(&waiting, &payload) {
                info!("Not enqueueing duplicate job");
                return Ok(EnqueueOutcome::Duplicate);
            }
        }

        let pushed = conn.rpush(&key, &raw).await;
        let length = conn.check(pushed)?;
        debug!(length, "Enqueued job");
        Ok(EnqueueOutcome::Enqueued { length })
    }

    /// Push an already-built envelope without duplicate checks
    pub async fn push(&self, queue: &str, payload: &Payload) -> Result<usize, EnqueueError> {
        if queue.is_empty() {
            return Err(EnqueueError::EmptyQueue);
        }
        let raw = codec::encode_payload(payload)?;
        let mut conn = self.pool.acquire().await?;
        let pushed = conn.rpush(&self.keys.queue(queue), &raw).await;
        Ok(conn.check(pushed)?)
    }
}

/// Whether any decodable entry matches the candidate's class and arguments
fn contains_job(waiting: &[String], candidate: &Payload) -> bool {
    waiting
        .iter()
        .filter_map(|raw| codec::decode_payload(raw).ok())
        .any(|existing| existing.same_job(candidate))
}

//! Weighted queue poller
//!
//! Sweeps the queue rotation with non-blocking pops and feeds discovered
//! jobs into the job stream. A connection is checked out for each pop and
//! released before the job is emitted or the poller sleeps.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::codec::{self, CodecError, Job};
use crate::config::{Queues, WorkerConfig};
use crate::keys::Keys;
use crate::persistence::{Connection, StoreError};
use crate::resource_pool::{Manager, PoolError, ResourcePool};

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Weighted rotation to sweep
    pub queues: Queues,

    /// Sleep after a sweep that found every queue empty
    pub interval: Duration,

    /// End the job stream after the first all-empty sweep instead of sleeping
    pub exit_on_complete: bool,
}

impl PollerConfig {
    pub fn new(queues: Queues) -> Self {
        Self {
            queues,
            interval: Duration::from_secs(5),
            exit_on_complete: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_exit_on_complete(mut self, exit_on_complete: bool) -> Self {
        self.exit_on_complete = exit_on_complete;
        self
    }
}

impl From<&WorkerConfig> for PollerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            queues: config.queues.clone(),
            interval: config.interval,
            exit_on_complete: config.exit_on_complete,
        }
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A popped entry could not be decoded; the entry is dropped
    #[error("malformed job in queue {queue}: {source}")]
    Malformed {
        queue: String,
        #[source]
        source: CodecError,
    },
}

/// Result of one pop attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// A job was popped and decoded
    Job(Job),

    /// The queue under the cursor was empty
    Empty,
}

/// How a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    /// Shutdown was requested
    Shutdown,

    /// Every queue was found empty with exit-on-complete set
    Complete,

    /// The resource pool was closed underneath the poller
    PoolClosed,

    /// Every consumer of the job stream went away
    StreamClosed,
}

/// Sweeps a weighted queue rotation
pub struct Poller<M: Manager> {
    pool: ResourcePool<M>,
    keys: Keys,
    config: PollerConfig,
    cursor: usize,
    empty_streak: usize,
    streak_failed: bool,
}

impl<M> Poller<M>
where
    M: Manager,
    M::Resource: Connection,
{
    pub fn new(pool: ResourcePool<M>, keys: Keys, config: PollerConfig) -> Self {
        Self {
            pool,
            keys,
            config,
            cursor: 0,
            empty_streak: 0,
            streak_failed: false,
        }
    }

    /// Queue the next pop attempt will target
    pub fn current_queue(&self) -> Option<&str> {
        self.config
            .queues
            .rotation()
            .get(self.cursor)
            .map(String::as_str)
    }

    /// Whether every queue in the rotation came up empty since the last job
    ///
    /// A sweep in which any pop failed is not empty: the failed queues were
    /// never actually inspected.
    pub fn swept_empty(&self) -> bool {
        self.sweep_done() && !self.streak_failed
    }

    /// Whether a full sweep without a job included failed pops
    pub fn swept_with_errors(&self) -> bool {
        self.sweep_done() && self.streak_failed
    }

    fn sweep_done(&self) -> bool {
        self.empty_streak >= self.config.queues.len()
    }

    fn reset_sweep(&mut self) {
        self.empty_streak = 0;
        self.streak_failed = false;
    }

    /// Pop once from the queue under the cursor and advance the rotation
    ///
    /// In strict mode a successful pop rewinds to the first queue, so earlier
    /// queues are drained before later ones are inspected.
    #[instrument(level = "trace", skip(self), fields(queue = self.current_queue().unwrap_or_default()))]
    pub async fn poll_once(&mut self) -> Result<Poll, PollerError> {
        let len = self.config.queues.len();
        let Some(queue) = self.current_queue().map(str::to_string) else {
            return Ok(Poll::Empty);
        };
        if self.sweep_done() {
            self.reset_sweep();
        }

        let popped = self.pop(&queue).await;
        let found = matches!(popped, Ok(Some(_)) | Err(PollerError::Malformed { .. }));

        if found {
            self.reset_sweep();
            self.cursor = if self.config.queues.is_strict() {
                0
            } else {
                (self.cursor + 1) % len
            };
        } else {
            self.empty_streak += 1;
            self.streak_failed |= popped.is_err();
            self.cursor = (self.cursor + 1) % len;
        }

        match popped? {
            Some(job) => {
                debug!(class = %job.payload.class, "Found job");
                Ok(Poll::Job(job))
            }
            None => {
                trace!("Queue empty");
                Ok(Poll::Empty)
            }
        }
    }

    async fn pop(&self, queue: &str) -> Result<Option<Job>, PollerError> {
        let mut conn = self.pool.acquire().await?;
        let popped = conn.lpop(&self.keys.queue(queue)).await;
        let raw = conn.check(popped)?;
        drop(conn);

        let Some(raw) = raw else {
            return Ok(None);
        };
        let payload = codec::decode_payload(&raw).map_err(|source| PollerError::Malformed {
            queue: queue.to_string(),
            source,
        })?;
        Ok(Some(Job::new(queue, payload)))
    }

    /// Run the poll loop until shutdown, completion or pool closure
    ///
    /// The job stream closes when this returns, because `jobs` is dropped.
    pub async fn run(
        mut self,
        jobs: mpsc::UnboundedSender<Job>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PollerExit {
        info!(
            queues = %self.config.queues,
            strict = self.config.queues.is_strict(),
            "Poller started"
        );

        let exit = loop {
            if *shutdown.borrow() {
                break PollerExit::Shutdown;
            }

            match self.poll_once().await {
                Ok(Poll::Job(job)) => {
                    if jobs.send(job).is_err() {
                        break PollerExit::StreamClosed;
                    }
                    continue;
                }
                Ok(Poll::Empty) => {}
                Err(PollerError::Pool(PoolError::Closed)) => break PollerExit::PoolClosed,
                Err(err @ PollerError::Malformed { .. }) => {
                    warn!(error = %err, "Skipping malformed job");
                    continue;
                }
                Err(err) => error!(error = %err, "Poll failed"),
            }

            if !self.sweep_done() {
                continue;
            }
            let failed = self.streak_failed;
            self.reset_sweep();

            if failed {
                warn!(
                    interval_ms = self.config.interval.as_millis(),
                    "Sweep hit store errors, retrying after interval"
                );
            } else if self.config.exit_on_complete {
                break PollerExit::Complete;
            } else {
                trace!(interval_ms = self.config.interval.as_millis(), "All queues empty, sleeping");
            }
            if wait(self.config.interval, &mut shutdown).await {
                break PollerExit::Shutdown;
            }
        };

        info!(?exit, "Poller stopped");
        exit
    }

    /// Spawn the poll loop, returning the job stream
    pub fn spawn(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> (mpsc::UnboundedReceiver<Job>, JoinHandle<PollerExit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(tx, shutdown));
        (rx, handle)
    }
}

/// Sleep for `interval`, returning early with `true` on shutdown
async fn wait(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let stopped = async {
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            // Sender gone: shutdown can no longer be requested
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = stopped => {
            debug!("Shutdown signal received during wait");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Payload;
    use crate::persistence::MemoryStore;
    use crate::resource_pool::PoolConfig;
    use serde_json::json;

    async fn push(store: &MemoryStore, queue: &str, class: &str) {
        let raw = codec::encode_payload(&Payload::new(class, vec![json!(queue)])).unwrap();
        store
            .connection()
            .rpush(&format!("resque:queue:{queue}"), &raw)
            .await
            .unwrap();
    }

    fn poller(store: &MemoryStore, queues: &str) -> Poller<MemoryStore> {
        let pool = ResourcePool::new(store.clone(), PoolConfig::new(1));
        let config = PollerConfig::new(Queues::parse(queues).unwrap());
        Poller::new(pool, Keys::new("resque:"), config)
    }

    async fn drain(poller: &mut Poller<MemoryStore>, attempts: usize) -> Vec<String> {
        let mut order = Vec::new();
        for _ in 0..attempts {
            if let Poll::Job(job) = poller.poll_once().await.unwrap() {
                order.push(job.queue);
            }
        }
        order
    }

    #[test]
    fn test_config_from_worker_config() {
        let worker = WorkerConfig::default()
            .with_queues(Queues::parse("a=2").unwrap())
            .with_interval(Duration::from_millis(10))
            .with_exit_on_complete(true);
        let config = PollerConfig::from(&worker);
        assert_eq!(config.queues.rotation(), ["a", "a"]);
        assert_eq!(config.interval, Duration::from_millis(10));
        assert!(config.exit_on_complete);
    }

    #[tokio::test]
    async fn test_weighted_rotation_interleaves() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            push(&store, "high", "A").await;
            push(&store, "low", "A").await;
        }

        let mut poller = poller(&store, "high=2,low=1");
        let order = drain(&mut poller, 6).await;
        // The third high pop attempt finds the queue drained
        assert_eq!(order, vec!["high", "high", "low", "high", "low"]);
    }

    #[tokio::test]
    async fn test_strict_rotation_drains_in_order() {
        let store = MemoryStore::new();
        push(&store, "low", "A").await;
        push(&store, "high", "A").await;
        push(&store, "high", "A").await;

        let mut poller = poller(&store, "high,low");
        let order = drain(&mut poller, 4).await;
        assert_eq!(order, vec!["high", "high", "low"]);
    }

    #[tokio::test]
    async fn test_full_empty_sweep_detected() {
        let store = MemoryStore::new();
        let mut poller = poller(&store, "a,b,c");

        for _ in 0..2 {
            assert_eq!(poller.poll_once().await.unwrap(), Poll::Empty);
            assert!(!poller.swept_empty());
        }
        assert_eq!(poller.poll_once().await.unwrap(), Poll::Empty);
        assert!(poller.swept_empty());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_dropped() {
        let store = MemoryStore::new();
        store
            .connection()
            .rpush("resque:queue:a", "{not json")
            .await
            .unwrap();
        push(&store, "a", "Good").await;

        let mut poller = poller(&store, "a");
        assert!(matches!(
            poller.poll_once().await,
            Err(PollerError::Malformed { .. })
        ));
        assert!(!poller.swept_empty());
        assert!(matches!(poller.poll_once().await.unwrap(), Poll::Job(_)));
    }

    #[tokio::test]
    async fn test_exit_on_complete_closes_stream() {
        let store = MemoryStore::new();
        push(&store, "a", "A").await;

        let (_stop, shutdown) = watch::channel(false);
        let config = PollerConfig::new(Queues::parse("a").unwrap())
            .with_interval(Duration::from_secs(3600))
            .with_exit_on_complete(true);
        let pool = ResourcePool::new(store.clone(), PoolConfig::new(1));
        let (mut jobs, handle) = Poller::new(pool, Keys::new("resque:"), config).spawn(shutdown);

        assert_eq!(jobs.recv().await.unwrap().payload.class, "A");
        assert!(jobs.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), PollerExit::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let store = MemoryStore::new();
        let (stop, shutdown) = watch::channel(false);
        let config = PollerConfig::new(Queues::parse("a").unwrap())
            .with_interval(Duration::from_secs(3600));
        let pool = ResourcePool::new(store.clone(), PoolConfig::new(1));
        let (mut jobs, handle) = Poller::new(pool, Keys::new("resque:"), config).spawn(shutdown);

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.send(true).unwrap();

        assert!(jobs.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), PollerExit::Shutdown);
    }

    #[tokio::test]
    async fn test_failed_pops_are_not_an_empty_sweep() {
        let store = MemoryStore::new();
        let mut poller = poller(&store, "a,b");
        store.set_offline(true);

        for _ in 0..2 {
            assert!(matches!(
                poller.poll_once().await,
                Err(PollerError::Pool(PoolError::Create(_)))
            ));
        }
        assert!(!poller.swept_empty());
        assert!(poller.swept_with_errors());

        store.set_offline(false);
        for _ in 0..2 {
            assert_eq!(poller.poll_once().await.unwrap(), Poll::Empty);
        }
        assert!(poller.swept_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_store_outage_retries_instead_of_completing() {
        let store = MemoryStore::new();
        push(&store, "a", "A").await;
        store.set_offline(true);

        let (_stop, shutdown) = watch::channel(false);
        let config = PollerConfig::new(Queues::parse("a").unwrap())
            .with_interval(Duration::from_secs(5))
            .with_exit_on_complete(true);
        let pool = ResourcePool::new(store.clone(), PoolConfig::new(1));
        let (mut jobs, handle) = Poller::new(pool, Keys::new("resque:"), config).spawn(shutdown);

        // Several back-off rounds while the store is down
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!handle.is_finished());
        assert!(jobs.try_recv().is_err());

        store.set_offline(false);
        assert_eq!(jobs.recv().await.unwrap().payload.class, "A");
        assert!(jobs.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), PollerExit::Complete);
        assert_eq!(store.connection().llen("resque:queue:a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_stops_poller() {
        let store = MemoryStore::new();
        let (_stop, shutdown) = watch::channel(false);
        let pool = ResourcePool::new(store.clone(), PoolConfig::new(1));
        pool.close();

        let config = PollerConfig::new(Queues::parse("a").unwrap());
        let (_jobs, handle) = Poller::new(pool, Keys::new("resque:"), config).spawn(shutdown);
        assert_eq!(handle.await.unwrap(), PollerExit::PoolClosed);
    }
}

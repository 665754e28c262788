//! Runtime context tying configuration, connection pool and handlers together

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::config::{ConfigError, WorkerConfig};
use crate::enqueue::{EnqueueError, EnqueueOutcome, Enqueuer};
use crate::keys::Keys;
use crate::persistence::Connection;
use crate::registry::{HandlerRegistry, JobResult};
use crate::resource_pool::{Manager, PoolError, ResourcePool};
use crate::stats::Stats;
use crate::worker::{Poller, PollerConfig, PollerExit, WorkerPool, WorkerReport};

#[cfg(feature = "redis")]
use crate::persistence::RedisConnector;
#[cfg(feature = "redis")]
use crate::resource_pool::PoolConfig;

/// Errors that stop a run before any job is processed
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no store connection available: {0}")]
    Unavailable(#[from] PoolError),
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub exit: PollerExit,
    pub workers: Vec<WorkerReport>,
}

impl RunReport {
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    pub fn failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }
}

/// Explicit worker runtime
///
/// Owns everything a run needs, so several independent runtimes can coexist
/// in one process. The connection pool is shared with the caller and is
/// never closed by the runtime.
///
/// # Example
///
/// ```
/// use rework::persistence::MemoryStore;
/// use rework::{PoolConfig, Queues, ResourcePool, Runtime, WorkerConfig};
///
/// # tokio_test::block_on(async {
/// let config = WorkerConfig::default()
///     .with_queues(Queues::parse("mail").unwrap())
///     .with_exit_on_complete(true);
/// let pool = ResourcePool::new(MemoryStore::new(), PoolConfig::new(2));
///
/// let mut runtime = Runtime::new(config, pool);
/// runtime.register("SendEmail", |_queue, _args| async { Ok(()) });
/// runtime.enqueue("mail", "SendEmail", vec![], false).await.unwrap();
///
/// let report = runtime.work_until_complete().await.unwrap();
/// assert_eq!(report.processed(), 1);
/// # });
/// ```
pub struct Runtime<M: Manager> {
    config: WorkerConfig,
    pool: ResourcePool<M>,
    keys: Keys,
    registry: Arc<HandlerRegistry>,
}

impl<M> Runtime<M>
where
    M: Manager,
    M::Resource: Connection,
{
    /// Create a runtime over an existing pool
    pub fn new(config: WorkerConfig, pool: ResourcePool<M>) -> Self {
        let keys = Keys::new(config.namespace.clone());
        Self {
            config,
            pool,
            keys,
            registry: Arc::new(HandlerRegistry::new()),
        }
    }

    /// Register a handler for a job class
    ///
    /// Handlers must be registered before [`Runtime::work`] is called.
    pub fn register<F, Fut>(&mut self, class: impl Into<String>, handler: F)
    where
        F: Fn(String, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = JobResult> + Send + 'static,
    {
        Arc::make_mut(&mut self.registry).register(class, handler);
    }

    /// Replace the handler registry
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn pool(&self) -> &ResourcePool<M> {
        &self.pool
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// A producer handle sharing this runtime's pool and namespace
    pub fn enqueuer(&self) -> Enqueuer<M> {
        Enqueuer::new(self.pool.clone(), self.keys.clone())
    }

    /// Push a job onto a queue, optionally skipping exact duplicates
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        dedupe: bool,
    ) -> Result<EnqueueOutcome, EnqueueError> {
        self.enqueuer().enqueue(queue, class, args, dedupe).await
    }

    /// Inspection handle over this runtime's namespace
    pub fn stats(&self) -> Stats<M> {
        Stats::new(self.pool.clone(), self.keys.clone())
    }

    /// Poll and process jobs until `shutdown` turns true, or until every queue
    /// is empty when exit-on-complete is set
    ///
    /// Returns once every worker has finished its in-flight job and
    /// unregistered.
    #[instrument(skip_all, fields(queues = %self.config.queues))]
    pub async fn work(&self, shutdown: watch::Receiver<bool>) -> Result<RunReport, WorkError> {
        self.config.validate()?;

        // Fail fast when the store cannot be reached at all
        drop(self.pool.acquire().await?);

        info!(config = %self.config, "Starting");

        let poller = Poller::new(
            self.pool.clone(),
            self.keys.clone(),
            PollerConfig::from(&self.config),
        );
        let (jobs, poller_handle) = poller.spawn(shutdown);

        let workers = WorkerPool::new(
            self.pool.clone(),
            self.keys.clone(),
            Arc::clone(&self.registry),
            self.config.concurrency,
            self.config.queues.names(),
        );
        let reports = workers.run(jobs).await;

        let exit = match poller_handle.await {
            Ok(exit) => exit,
            Err(err) => {
                error!(error = %err, "Poller task failed");
                PollerExit::StreamClosed
            }
        };

        let report = RunReport {
            exit,
            workers: reports,
        };
        info!(
            ?exit,
            processed = report.processed(),
            failed = report.failed(),
            "Stopped"
        );
        Ok(report)
    }

    /// Run until every queue is empty, regardless of the configured flag
    pub async fn work_until_complete(&self) -> Result<RunReport, WorkError> {
        let (_stop, shutdown) = watch::channel(false);
        let runtime = Runtime {
            config: self.config.clone().with_exit_on_complete(true),
            pool: self.pool.clone(),
            keys: self.keys.clone(),
            registry: Arc::clone(&self.registry),
        };
        runtime.work(shutdown).await
    }

    /// Run until Ctrl+C
    pub async fn work_until_ctrl_c(&self) -> Result<RunReport, WorkError> {
        let (stop, shutdown) = watch::channel(false);
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                let _ = stop.send(true);
            }
        });

        let result = self.work(shutdown).await;
        signal.abort();
        result
    }
}

#[cfg(feature = "redis")]
impl Runtime<RedisConnector> {
    /// Connect to the configured Redis address
    ///
    /// The pool holds up to `connections` connections and discards ones
    /// idle for over a minute. No connection is opened until first use.
    pub fn connect(config: WorkerConfig) -> Result<Self, WorkError> {
        let connector = RedisConnector::new(&config.uri).map_err(PoolError::from)?;
        let pool = ResourcePool::new(
            connector,
            PoolConfig::new(config.connections)
                .with_idle_timeout(std::time::Duration::from_secs(60)),
        );
        Ok(Self::new(config, pool))
    }
}

impl<M: Manager> std::fmt::Debug for Runtime<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("registry", &self.registry)
            .finish()
    }
}

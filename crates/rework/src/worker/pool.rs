//! Worker pool
//!
//! A fixed set of workers shares one job stream. Each job runs inside a
//! recovered execution scope, so a panicking handler becomes a failure record
//! instead of taking its worker down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::process::{Process, StatusError, WorkerId};
use crate::codec::Job;
use crate::keys::Keys;
use crate::persistence::Connection;
use crate::registry::{HandlerRegistry, JobError, JobResult};
use crate::resource_pool::{Manager, ResourcePool};

/// Shared consumer side of the job stream
type JobStream = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Per-worker totals, reported when a worker exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Rendered worker id
    pub worker: String,
    pub processed: u64,
    pub failed: u64,
}

/// Runs jobs from a job stream on a fixed number of workers
pub struct WorkerPool<M: Manager> {
    pool: ResourcePool<M>,
    keys: Keys,
    registry: Arc<HandlerRegistry>,
    concurrency: usize,
    queues: Vec<String>,
}

impl<M> WorkerPool<M>
where
    M: Manager,
    M::Resource: Connection,
{
    /// Create a pool of `concurrency` workers polling `queues`
    pub fn new(
        pool: ResourcePool<M>,
        keys: Keys,
        registry: Arc<HandlerRegistry>,
        concurrency: usize,
        queues: Vec<String>,
    ) -> Self {
        Self {
            pool,
            keys,
            registry,
            concurrency: concurrency.max(1),
            queues,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn every worker on the given stream
    pub fn spawn(&self, jobs: mpsc::UnboundedReceiver<Job>) -> Vec<JoinHandle<WorkerReport>> {
        let jobs: JobStream = Arc::new(Mutex::new(jobs));
        (0..self.concurrency)
            .map(|index| {
                let worker = Worker {
                    process: Process::new(
                        WorkerId::new(index, self.queues.clone()),
                        self.keys.clone(),
                    ),
                    pool: self.pool.clone(),
                    registry: Arc::clone(&self.registry),
                };
                tokio::spawn(worker.work(Arc::clone(&jobs)))
            })
            .collect()
    }

    /// Run every worker until the stream is closed and drained
    pub async fn run(&self, jobs: mpsc::UnboundedReceiver<Job>) -> Vec<WorkerReport> {
        info!(concurrency = self.concurrency, "Starting workers");
        let results = join_all(self.spawn(jobs)).await;
        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(report) => Some(report),
                Err(err) => {
                    error!(error = %err, "Worker task failed");
                    None
                }
            })
            .collect()
    }
}

struct Worker<M: Manager> {
    process: Process,
    pool: ResourcePool<M>,
    registry: Arc<HandlerRegistry>,
}

impl<M> Worker<M>
where
    M: Manager,
    M::Resource: Connection,
{
    async fn work(self, jobs: JobStream) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.process.name().to_string(),
            ..Default::default()
        };

        if let Err(err) = self.open().await {
            error!(worker = %report.worker, error = %err, "Failed to register worker");
        }
        debug!(worker = %report.worker, "Worker started");

        loop {
            let job = jobs.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };
            if self.run(&job).await.is_ok() {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
        }

        if let Err(err) = self.close().await {
            error!(worker = %report.worker, error = %err, "Failed to unregister worker");
        }
        debug!(
            worker = %report.worker,
            processed = report.processed,
            failed = report.failed,
            "Worker stopped"
        );
        report
    }

    /// Start, execute and finish one job
    #[instrument(
        level = "debug",
        skip(self, job),
        fields(worker = %self.process.name(), queue = %job.queue, class = %job.payload.class)
    )]
    async fn run(&self, job: &Job) -> JobResult {
        if let Err(err) = self.start(job).await {
            warn!(error = %err, "Failed to record job start");
        }

        let result = self.execute(job).await;
        match &result {
            Ok(()) => debug!("Job done"),
            Err(err) => error!(exception = %err.exception, error = %err.message, "Job failed"),
        }

        if let Err(err) = self.finish(job, &result).await {
            error!(error = %err, "Failed to record job outcome");
        }
        result
    }

    async fn execute(&self, job: &Job) -> JobResult {
        let Some(handler) = self.registry.get(&job.payload.class) else {
            return Err(JobError::handler_not_found(
                &job.payload.class,
                &job.queue,
                &job.payload.args,
            ));
        };

        // Calling the handler may itself panic before a future exists
        let call = async { handler(job.queue.clone(), job.payload.args.clone()).await };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(JobError::panic(panic_message(&*panic))),
        }
    }

    async fn open(&self) -> Result<(), StatusError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.process.open(&mut *conn).await;
        if result.as_ref().is_err_and(StatusError::is_transport) {
            conn.mark_broken();
        }
        result
    }

    async fn close(&self) -> Result<(), StatusError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.process.close(&mut *conn).await;
        if result.as_ref().is_err_and(StatusError::is_transport) {
            conn.mark_broken();
        }
        result
    }

    async fn start(&self, job: &Job) -> Result<(), StatusError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.process.start(&mut *conn, job).await;
        if result.as_ref().is_err_and(StatusError::is_transport) {
            conn.mark_broken();
        }
        result
    }

    async fn finish(&self, job: &Job, outcome: &JobResult) -> Result<(), StatusError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.process.finish(&mut *conn, job, outcome).await;
        if result.as_ref().is_err_and(StatusError::is_transport) {
            conn.mark_broken();
        }
        result
    }
}

/// Describe a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl<M: Manager> std::fmt::Debug for WorkerPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .field("queues", &self.queues)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Payload;
    use crate::persistence::MemoryStore;
    use crate::resource_pool::PoolConfig;
    use serde_json::json;

    fn workers(
        store: &MemoryStore,
        registry: HandlerRegistry,
        concurrency: usize,
    ) -> WorkerPool<MemoryStore> {
        WorkerPool::new(
            ResourcePool::new(store.clone(), PoolConfig::new(2)),
            Keys::new("resque:"),
            Arc::new(registry),
            concurrency,
            vec!["default".into()],
        )
    }

    fn stream(jobs: Vec<Job>) -> mpsc::UnboundedReceiver<Job> {
        let (tx, rx) = mpsc::unbounded_channel();
        for job in jobs {
            tx.send(job).unwrap();
        }
        rx
    }

    async fn explode(_: String, _: Vec<serde_json::Value>) -> JobResult {
        panic!("exploded")
    }

    fn job(class: &str) -> Job {
        Job::new("default", Payload::new(class, vec![json!(1)]))
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42_u8), "handler panicked");
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let pool = workers(&MemoryStore::new(), HandlerRegistry::new(), 0);
        assert_eq!(pool.concurrency(), 1);
    }

    #[tokio::test]
    async fn test_runs_every_job_once() {
        let store = MemoryStore::new();
        let mut registry = HandlerRegistry::new();
        registry.register("Ok", |_, _| async { Ok(()) });

        let reports = workers(&store, registry, 3)
            .run(stream((0..10).map(|_| job("Ok")).collect()))
            .await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().map(|r| r.processed).sum::<u64>(), 10);
        assert_eq!(reports.iter().map(|r| r.failed).sum::<u64>(), 0);

        let mut conn = store.connection();
        assert_eq!(conn.get("resque:stat:processed").await.unwrap().as_deref(), Some("10"));
        // Closed workers leave no registry entries behind
        assert!(conn.smembers("resque:workers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_and_worker_continues() {
        let store = MemoryStore::new();
        let mut registry = HandlerRegistry::new();
        registry.register("Boom", explode);
        registry.register("Ok", |_, _| async { Ok(()) });

        let reports = workers(&store, registry, 1)
            .run(stream(vec![job("Boom"), job("Ok")]))
            .await;
        assert_eq!(reports[0].failed, 1);
        assert_eq!(reports[0].processed, 1);

        let mut conn = store.connection();
        let failures = conn.lrange("resque:failed", 0, -1).await.unwrap();
        assert_eq!(failures.len(), 1);
        let failure: crate::codec::Failure = crate::codec::decode(&failures[0]).unwrap();
        assert_eq!(failure.exception, "Panic");
        assert_eq!(failure.error, "exploded");
    }

    #[tokio::test]
    async fn test_missing_handler_is_failure() {
        let store = MemoryStore::new();
        let reports = workers(&store, HandlerRegistry::new(), 1)
            .run(stream(vec![job("Nobody")]))
            .await;
        assert_eq!(reports[0].failed, 1);

        let mut conn = store.connection();
        let failures = conn.lrange("resque:failed", 0, -1).await.unwrap();
        let failure: crate::codec::Failure = crate::codec::decode(&failures[0]).unwrap();
        assert_eq!(failure.error, "No worker for Nobody in queue default with args [1]");
        assert!(conn.get("resque:stat:processed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_outage_does_not_stop_execution() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        {
            let ran = Arc::clone(&ran);
            registry.register("Count", move |_, _| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        let reports = workers(&store, registry, 1)
            .run(stream(vec![job("Count"), job("Count")]))
            .await;
        assert_eq!(reports[0].processed, 2);
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}

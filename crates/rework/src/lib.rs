//! # Rework
//!
//! A background job worker speaking the Resque wire protocol.
//!
//! ## Features
//!
//! - **Weighted polling**: `high=2,low=1` polls `high` twice as often as `low`;
//!   unweighted queues are drained in declaration order
//! - **Bounded connections**: the poller and every worker share one
//!   fixed-size connection pool
//! - **Panic recovery**: a panicking handler becomes a failure record, and its
//!   worker keeps going
//! - **Resque compatibility**: queue entries, worker status, failures and
//!   counters use the keys and JSON documents Resque tooling reads
//! - **Dedupe on enqueue**: best-effort suppression of identical waiting jobs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Runtime                              │
//! │   (WorkerConfig, HandlerRegistry, shared ResourcePool)      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                     │                       │
//!          ▼                     ▼                       ▼
//! ┌─────────────────┐  ┌────────────────────┐  ┌─────────────────┐
//! │    Enqueuer     │  │ Poller → WorkerPool│  │      Stats      │
//! │ (RPUSH, dedupe) │  │  (LPOP, run jobs)  │  │  (read-only)    │
//! └─────────────────┘  └────────────────────┘  └─────────────────┘
//!          │                     │                       │
//!          ▼                     ▼                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             ResourcePool<RedisConnector | MemoryStore>      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rework::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkerConfig::from_env()?.with_queues(Queues::parse("high=2,low=1")?);
//! let mut runtime = Runtime::connect(config)?;
//!
//! runtime.register("SendEmail", |queue, args| async move {
//!     tracing::info!(%queue, ?args, "sending");
//!     Ok(())
//! });
//!
//! runtime.work_until_ctrl_c().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod enqueue;
pub mod keys;
pub mod persistence;
pub mod registry;
pub mod resource_pool;
pub mod runtime;
pub mod stats;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::codec::{Failure, Job, Payload, WorkStatus};
    pub use crate::config::{ConfigError, Queues, WorkerConfig};
    pub use crate::enqueue::{EnqueueError, EnqueueOutcome, Enqueuer};
    pub use crate::persistence::{Connection, MemoryStore, StoreError};
    #[cfg(feature = "redis")]
    pub use crate::persistence::RedisConnector;
    pub use crate::registry::{HandlerRegistry, JobError, JobResult};
    pub use crate::resource_pool::{Manager, PoolConfig, PoolError, ResourcePool};
    pub use crate::runtime::{RunReport, Runtime, WorkError};
    pub use crate::stats::Stats;
}

// Re-export key types at crate root
pub use codec::{CodecError, Failure, Job, Payload, WorkStatus};
pub use config::{parse_interval, ConfigError, Queues, WorkerConfig};
pub use enqueue::{EnqueueError, EnqueueOutcome, Enqueuer};
pub use keys::Keys;
pub use persistence::{Connection, MemoryStore, StoreError};
#[cfg(feature = "redis")]
pub use persistence::RedisConnector;
pub use registry::{HandlerRegistry, JobError, JobHandler, JobResult};
pub use resource_pool::{Manager, PoolConfig, PoolError, Pooled, ResourcePool};
pub use runtime::{RunReport, Runtime, WorkError};
pub use stats::{Stats, StatsError, Summary, WorkerInfo};
pub use worker::{Poller, PollerConfig, PollerExit, StatusError, WorkerId, WorkerPool};

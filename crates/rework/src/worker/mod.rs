//! Job distribution pipeline
//!
//! This module provides:
//! - [`Poller`] - Sweeps the weighted queue rotation into the job stream
//! - [`WorkerPool`] - Concurrent workers consuming the job stream
//! - [`Process`] / [`WorkerId`] - Per-worker status records in the store
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────┐
//! │   queue:high   queue:low      │  store
//! └──────────────┬────────────────┘
//!                │ LPOP (one connection per pop)
//!                ▼
//! ┌───────────────────────────────┐
//! │            Poller             │  high, high, low, high, ...
//! └──────────────┬────────────────┘
//!                │ unbounded job stream
//!                ▼
//! ┌───────────────────────────────┐
//! │          WorkerPool           │
//! │  [worker 0] [worker 1] ...    │  start → execute → finish
//! └──────────────┬────────────────┘
//!                │ status, failures, counters
//!                ▼
//!              store
//! ```

mod poller;
mod pool;
mod process;

pub use poller::{Poll, Poller, PollerConfig, PollerError, PollerExit};
pub use pool::{panic_message, WorkerPool, WorkerReport};
pub use process::{Process, StatusError, WorkerId};

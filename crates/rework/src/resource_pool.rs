//! Bounded pool of reusable store connections
//!
//! Connections are created lazily up to the configured capacity. A checkout
//! is an RAII guard ([`Pooled`]); dropping it returns the connection to the
//! pool unless it was marked broken or the pool has been closed.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::persistence::StoreError;

/// Creates the resources a [`ResourcePool`] hands out
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// The pooled resource, typically a store connection
    type Resource: Send + 'static;

    /// Open a fresh resource
    async fn create(&self) -> Result<Self::Resource, StoreError>;
}

/// Pool sizing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of resources checked out at once
    pub capacity: usize,

    /// Idle resources older than this are discarded instead of reused
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Default::default()
        }
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Keep idle resources forever
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }
}

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was closed before or while waiting for a resource
    #[error("pool closed")]
    Closed,

    /// Opening a new resource failed
    #[error("failed to open connection: {0}")]
    Create(#[from] StoreError),
}

struct IdleResource<R> {
    resource: R,
    since: Instant,
}

struct Shared<M: Manager> {
    manager: M,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleResource<M::Resource>>>,
    closed: AtomicBool,
}

/// Bounded, lazily-filled pool of resources
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct ResourcePool<M: Manager> {
    shared: Arc<Shared<M>>,
}

impl<M: Manager> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Manager> ResourcePool<M> {
    /// Create a new pool; no resource is opened until the first acquisition
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                manager,
                config: PoolConfig {
                    capacity,
                    ..config
                },
                permits: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(Vec::with_capacity(capacity)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Check out a resource, waiting while the pool is at capacity
    ///
    /// Fails immediately on a closed pool, and wakes with
    /// [`PoolError::Closed`] if the pool is closed while waiting.
    pub async fn acquire(&self) -> Result<Pooled<M>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let resource = match self.take_idle() {
            Some(resource) => resource,
            None => {
                trace!("Opening new pooled connection");
                self.shared.manager.create().await?
            }
        };

        Ok(Pooled {
            resource: Some(resource),
            shared: Arc::clone(&self.shared),
            broken: false,
            _permit: permit,
        })
    }

    /// Close the pool
    ///
    /// Idle resources are dropped immediately, checked-out resources are
    /// dropped when their guard is released, and waiters fail.
    pub fn close(&self) {
        {
            let mut idle = self.shared.idle.lock();
            self.shared.closed.store(true, Ordering::Release);
            idle.clear();
        }
        self.shared.permits.close();
        debug!("Resource pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Maximum number of concurrent checkouts
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    /// Number of resources currently checked out
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.config.capacity - self.shared.permits.available_permits()
    }

    /// Number of idle resources ready for reuse
    pub fn idle(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// The manager used to open resources
    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    fn take_idle(&self) -> Option<M::Resource> {
        let mut idle = self.shared.idle.lock();
        while let Some(entry) = idle.pop() {
            match self.shared.config.idle_timeout {
                Some(timeout) if entry.since.elapsed() >= timeout => {
                    trace!("Discarding expired idle connection");
                }
                _ => return Some(entry.resource),
            }
        }
        None
    }
}

impl<M: Manager> fmt::Debug for ResourcePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .field("idle", &self.idle())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A checked-out resource
///
/// Dereferences to the resource. Dropping the guard releases it.
pub struct Pooled<M: Manager> {
    resource: Option<M::Resource>,
    shared: Arc<Shared<M>>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: Manager> Pooled<M> {
    /// Discard the resource on release instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Pass a command result through, marking the resource broken on a
    /// transport error
    pub fn check<T>(&mut self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &result {
            if err.is_transport() {
                self.broken = true;
            }
        }
        result
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the resource out.
        self.resource.as_ref().expect("pooled resource present until drop")
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("pooled resource present until drop")
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        if self.broken {
            trace!("Dropping broken connection");
            return;
        }

        let mut idle = self.shared.idle.lock();
        if !self.shared.closed.load(Ordering::Acquire) {
            idle.push(IdleResource {
                resource,
                since: Instant::now(),
            });
        }
    }
}

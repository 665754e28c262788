//! Connection trait definition

use async_trait::async_trait;

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the store
    #[error("connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command
    #[error("command error: {0}")]
    Command(String),

    /// Operation against a key holding the wrong kind of value
    #[error("WRONGTYPE operation against key {0} holding the wrong kind of value")]
    WrongType(String),
}

impl StoreError {
    /// Whether the connection that produced this error should be discarded
    ///
    /// Type errors are answered by a healthy server; anything else may mean
    /// the socket is dead.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::WrongType(_))
    }
}

/// One checked-out connection to the key-value store
///
/// The command set is the subset of Redis that the Resque layout needs:
/// lists for queues and failures, strings for worker status and counters,
/// a set for the live worker registry.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Pop the head of a list, `None` when the list is empty or missing
    async fn lpop(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    /// Append to the tail of a list, returning the new length
    async fn rpush(&mut self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Read a list range with Redis index semantics (`-1` is the last element)
    async fn lrange(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError>;

    /// Length of a list, `0` when missing
    async fn llen(&mut self, key: &str) -> Result<usize, StoreError>;

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a key of any type
    async fn del(&mut self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment an integer counter, returning the new value
    async fn incr(&mut self, key: &str) -> Result<i64, StoreError>;

    async fn sadd(&mut self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&mut self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>, StoreError>;
}

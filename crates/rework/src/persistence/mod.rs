//! Persistence layer
//!
//! This module provides:
//! - [`Connection`] trait, the command set the worker speaks to the store
//! - [`MemoryStore`] in-memory keyspace for tests and embedding
//! - [`RedisConnector`] for production (feature `redis`)

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use memory::{MemoryConnection, MemoryStore};
#[cfg(feature = "redis")]
pub use self::redis::{RedisConnection, RedisConnector};
pub use store::{Connection, StoreError};

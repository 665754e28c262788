//! In-memory keyspace speaking the same command set as Redis

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::{Connection, StoreError};
use crate::resource_pool::Manager;

/// A stored value
#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

struct Inner {
    keyspace: RwLock<HashMap<String, Entry>>,
    offline: AtomicBool,
    connections_opened: AtomicUsize,
}

/// In-memory store
///
/// Every connection opened from the same `MemoryStore` (or a clone of it)
/// sees the same keyspace. Empty lists and sets are removed, and counters
/// are kept as decimal strings, as Redis does.
///
/// # Example
///
/// ```
/// use rework::persistence::MemoryStore;
/// use rework::{PoolConfig, ResourcePool};
///
/// let store = MemoryStore::new();
/// let pool = ResourcePool::new(store.clone(), PoolConfig::new(2));
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                keyspace: RwLock::new(HashMap::new()),
                offline: AtomicBool::new(false),
                connections_opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a connection outside of any pool
    pub fn connection(&self) -> MemoryConnection {
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        MemoryConnection {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Simulate an unreachable store: connecting and every command fail
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of connections opened so far
    pub fn connections_opened(&self) -> usize {
        self.inner.connections_opened.load(Ordering::SeqCst)
    }

    /// Number of keys currently present
    pub fn key_count(&self) -> usize {
        self.inner.keyspace.read().len()
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.keyspace.read().contains_key(key)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.inner.keyspace.write().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Manager for MemoryStore {
    type Resource = MemoryConnection;

    async fn create(&self) -> Result<MemoryConnection, StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".into()));
        }
        Ok(self.connection())
    }
}

/// Connection to a [`MemoryStore`]
pub struct MemoryConnection {
    inner: Arc<Inner>,
}

impl MemoryConnection {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("broken pipe".into()));
        }
        Ok(())
    }
}

/// Resolve a Redis-style inclusive range against a length
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn lpop(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        let mut keyspace = self.inner.keyspace.write();
        let (value, now_empty) = match keyspace.get_mut(key) {
            None => return Ok(None),
            Some(Entry::List(list)) => {
                let value = list.pop_front();
                (value, list.is_empty())
            }
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        if now_empty {
            keyspace.remove(key);
        }
        Ok(value)
    }

    async fn rpush(&mut self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut keyspace = self.inner.keyspace.write();
        match keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()))
        {
            Entry::List(list) => {
                list.push_back(value.to_string());
                Ok(list.len())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn lrange(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        let keyspace = self.inner.keyspace.read();
        match keyspace.get(key) {
            None => Ok(vec![]),
            Some(Entry::List(list)) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => vec![],
            }),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn llen(&mut self, key: &str) -> Result<usize, StoreError> {
        self.check_online()?;
        match self.inner.keyspace.read().get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        match self.inner.keyspace.read().get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner
            .keyspace
            .write()
            .insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(())
    }

    async fn del(&mut self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.keyspace.write().remove(key);
        Ok(())
    }

    async fn incr(&mut self, key: &str) -> Result<i64, StoreError> {
        self.check_online()?;
        let mut keyspace = self.inner.keyspace.write();
        let current = match keyspace.get(key) {
            None => 0,
            Some(Entry::Str(value)) => value.parse::<i64>().map_err(|_| {
                StoreError::Command("value is not an integer or out of range".into())
            })?,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let next = current + 1;
        keyspace.insert(key.to_string(), Entry::Str(next.to_string()));
        Ok(next)
    }

    async fn sadd(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut keyspace = self.inner.keyspace.write();
        match keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn srem(&mut self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut keyspace = self.inner.keyspace.write();
        let now_empty = match keyspace.get_mut(key) {
            None => return Ok(()),
            Some(Entry::Set(set)) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        if now_empty {
            keyspace.remove(key);
        }
        Ok(())
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        match self.inner.keyspace.read().get(key) {
            None => Ok(vec![]),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = MemoryStore::new();
        let mut conn = store.connection();

        assert_eq!(conn.rpush("q", "a").await.unwrap(), 1);
        assert_eq!(conn.rpush("q", "b").await.unwrap(), 2);
        assert_eq!(conn.llen("q").await.unwrap(), 2);

        assert_eq!(conn.lpop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(conn.lpop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(conn.lpop("q").await.unwrap(), None);

        // Emptied lists disappear
        assert!(!store.contains_key("q"));
    }

    #[tokio::test]
    async fn test_lrange_indices() {
        let store = MemoryStore::new();
        let mut conn = store.connection();
        for v in ["a", "b", "c", "d"] {
            conn.rpush("l", v).await.unwrap();
        }

        assert_eq!(conn.lrange("l", 0, -1).await.unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(conn.lrange("l", 1, 2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(conn.lrange("l", -2, -1).await.unwrap(), vec!["c", "d"]);
        assert_eq!(conn.lrange("l", 2, 100).await.unwrap(), vec!["c", "d"]);
        assert!(conn.lrange("l", 5, 10).await.unwrap().is_empty());
        assert!(conn.lrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryStore::new();
        let mut conn = store.connection();

        assert_eq!(conn.incr("c").await.unwrap(), 1);
        assert_eq!(conn.incr("c").await.unwrap(), 2);
        assert_eq!(conn.get("c").await.unwrap().as_deref(), Some("2"));

        conn.set("c", "0").await.unwrap();
        assert_eq!(conn.incr("c").await.unwrap(), 1);

        conn.set("s", "abc").await.unwrap();
        assert!(matches!(conn.incr("s").await, Err(StoreError::Command(_))));
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        let mut conn = store.connection();

        conn.sadd("workers", "b").await.unwrap();
        conn.sadd("workers", "a").await.unwrap();
        conn.sadd("workers", "a").await.unwrap();
        assert_eq!(conn.smembers("workers").await.unwrap(), vec!["a", "b"]);

        conn.srem("workers", "a").await.unwrap();
        conn.srem("workers", "b").await.unwrap();
        assert!(!store.contains_key("workers"));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        let mut conn = store.connection();
        conn.set("k", "v").await.unwrap();

        let err = conn.rpush("k", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType(_)));
        assert!(!err.is_transport());
        assert!(matches!(conn.lpop("k").await, Err(StoreError::WrongType(_))));
    }

    #[tokio::test]
    async fn test_offline_store() {
        let store = MemoryStore::new();
        let mut conn = store.connection();
        store.set_offline(true);

        let err = conn.get("k").await.unwrap_err();
        assert!(err.is_transport());
        assert!(store.create().await.is_err());

        store.set_offline(false);
        assert!(conn.get("k").await.unwrap().is_none());
        assert_eq!(store.connections_opened(), 1);
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("KV error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// The hash and sorted-set commands the chat history needs from a KV backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// A missing key reads back as an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Pipelined `hgetall` preserving the order of `keys`.
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Full range by score; `rev` returns highest score first.
    async fn zrange(&self, key: &str, rev: bool) -> Result<Vec<String>, StoreError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Deletes each member's hash and drops it from `index_key` in one round trip.
    async fn remove_members(&self, index_key: &str, members: &[String]) -> Result<usize, StoreError>;
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        Ok(pipe.query_async(&mut conn).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrange(&self, key: &str, rev: bool) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members = if rev {
            conn.zrevrange(key, 0, -1).await?
        } else {
            conn.zrange(key, 0, -1).await?
        };
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn remove_members(&self, index_key: &str, members: &[String]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for member in members {
            pipe.del(member).ignore();
            pipe.zrem(index_key, member).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(members.len())
    }
}

#[derive(Default)]
struct MemoryInner {
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, Vec<(i64, String)>>,
}

/// In-process backend for tests and `--store memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command fail, to exercise outage handling.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(keys
            .iter()
            .map(|k| inner.hashes.get(k).cloned().unwrap_or_default())
            .collect())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.hashes.remove(key);
        inner.zsets.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.push((score, member.to_string()));
        // Redis orders ties lexicographically by member.
        set.sort();
        Ok(())
    }

    async fn zrange(&self, key: &str, rev: bool) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut members: Vec<String> = inner
            .zsets
            .get(key)
            .map(|set| set.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default();
        if rev {
            members.reverse();
        }
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(set) = inner.zsets.get_mut(key) {
            set.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn remove_members(&self, index_key: &str, members: &[String]) -> Result<usize, StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        for member in members {
            inner.hashes.remove(member);
        }
        if let Some(set) = inner.zsets.get_mut(index_key) {
            set.retain(|(_, m)| !members.contains(m));
        }
        Ok(members.len())
    }
}

//! TTL cache behind a narrow trait: Redis in production, an in-memory table
//! for tests and local runs. Values are opaque strings; callers encode and
//! decode (serde_json). Expiry is honored at read time.
//!
//! Version dependencies:
//! - redis = "0.23"
//! - async-trait = "0.1"

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Key-value store with per-entry expiry plus the list operations used by
/// the batch-report journal. Atomicity at the key level is sufficient.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, CacheError>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError>;
}

/// Redis-backed cache using a multiplexed connection manager.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::from)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(CacheError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds as usize).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory cache for tests and local development. Entries past their TTL
/// are dropped on read.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, InMemoryEntry>>,
    lists: RwLock<HashMap<String, VecDeque<String>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            debug!(key, "cache entry expired");
            self.entries.write().remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.entries.write().insert(
            key.to_string(),
            InMemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        self.lists.write().remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.lists
            .write()
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let lists = self.lists.read();
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let clamp = |i: isize| -> usize {
            let resolved = if i < 0 { len + i } else { i };
            resolved.clamp(0, len) as usize
        };
        let from = clamp(start);
        let to = (clamp(stop) + 1).min(len as usize);
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(list.iter().skip(from).take(to - from).cloned().collect())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let mut lists = self.lists.write();
        if let Some(list) = lists.get_mut(key) {
            let len = list.len() as isize;
            let clamp = |i: isize| -> usize {
                let resolved = if i < 0 { len + i } else { i };
                resolved.clamp(0, len) as usize
            };
            let from = clamp(start);
            let to = (clamp(stop) + 1).min(len as usize);
            let kept: VecDeque<String> = if from >= to {
                VecDeque::new()
            } else {
                list.iter().skip(from).take(to - from).cloned().collect()
            };
            *list = kept;
        }
        Ok(())
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide key-value cache with TTL, atomic try-lock, and set-add /
//! cardinality primitives.
//!
//! Two interchangeable implementations share the same key-prefix rule: an
//! in-process map for single-instance deployments and tests, and a Redis
//! client for fleets.  Reads degrade gracefully — a failed `get` is a miss,
//! and callers are expected to treat `set` failures as log-and-continue.

#![deny(unsafe_code)]

use async_trait::async_trait;
use ota_config::CacheConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The Redis round-trip failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The Redis round-trip exceeded its per-call deadline.
    #[error("redis call timed out")]
    Timeout,
}

// ---------------------------------------------------------------------------
// KvCache
// ---------------------------------------------------------------------------

/// String→string cache with TTL, try-lock, and set primitives.
///
/// Implementations prepend a configurable prefix to every key.
#[async_trait]
pub trait KvCache: Send + Sync {
    /// Fetch a value; any backend failure reads as a miss.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a key.
    async fn delete(&self, key: &str);

    /// Atomic set-if-absent with TTL.  Returns whether the lock was acquired.
    async fn try_lock(&self, key: &str, ttl: Duration) -> bool;

    /// Add members to a set, optionally refreshing its TTL.
    async fn sadd(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Cardinality of a set; failures read as zero.
    async fn scard(&self, key: &str) -> u64;

    /// Drop every key (test support).
    async fn clear(&self);
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

fn expired(expires_at: &Option<Instant>) -> bool {
    matches!(expires_at, Some(at) if Instant::now() >= *at)
}

/// In-process cache backed by a mutex-guarded map.
pub struct MemoryCache {
    prefix: String,
    entries: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, SetEntry>>,
}

impl MemoryCache {
    /// Create an empty cache using `prefix` for every key.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Mutex::new(HashMap::new()),
            sets: Mutex::new(HashMap::new()),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let key = self.full_key(key);
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(&key) {
            Some(entry) if !expired(&entry.expires_at) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.remove(&key);
        None
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let key = self.full_key(key);
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key,
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) {
        let key = self.full_key(key);
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(&key);
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> bool {
        let key = self.full_key(key);
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let held = matches!(entries.get(&key), Some(entry) if !expired(&entry.expires_at));
        if held {
            return false;
        }
        entries.insert(
            key,
            Entry {
                value: "1".to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        true
    }

    async fn sadd(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let key = self.full_key(key);
        let mut sets = self.sets.lock().expect("cache lock poisoned");
        let entry = sets.entry(key).or_insert_with(|| SetEntry {
            members: HashSet::new(),
            expires_at: None,
        });
        if expired(&entry.expires_at) {
            entry.members.clear();
        }
        entry.members.extend(members.iter().cloned());
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn scard(&self, key: &str) -> u64 {
        let key = self.full_key(key);
        let mut sets = self.sets.lock().expect("cache lock poisoned");
        match sets.get(&key) {
            Some(entry) if !expired(&entry.expires_at) => return entry.members.len() as u64,
            Some(_) => {}
            None => return 0,
        }
        sets.remove(&key);
        0
    }

    async fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
        self.sets.lock().expect("cache lock poisoned").clear();
    }
}

// ---------------------------------------------------------------------------
// RedisCache
// ---------------------------------------------------------------------------

/// Per-call deadline for Redis round-trips.
const REDIS_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed cache.
pub struct RedisCache {
    prefix: String,
    connection: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis and verify the connection with a `PING`.
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
        use_tls: bool,
        prefix: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let scheme = if use_tls { "rediss" } else { "redis" };
        let auth = match password {
            Some(password) if !password.is_empty() => format!(":{password}@"),
            _ => String::new(),
        };
        let url = format!("{scheme}://{auth}{host}:{port}");
        let client = redis::Client::open(url)?;
        let mut connection = redis::aio::ConnectionManager::new(client).await?;

        let ping = redis::cmd("PING");
        tokio::time::timeout(
            Duration::from_secs(3),
            ping.query_async::<String>(&mut connection),
        )
        .await
        .map_err(|_| CacheError::Timeout)??;

        Ok(Self {
            prefix: prefix.into(),
            connection,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, CacheError> {
        let mut connection = self.connection.clone();
        let fut = cmd.query_async::<T>(&mut connection);
        tokio::time::timeout(REDIS_CALL_TIMEOUT, fut)
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::from)
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.full_key(key));
        match self.run::<Option<String>>(cmd).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "redis GET failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.run::<()>(cmd).await
    }

    async fn delete(&self, key: &str) {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.full_key(key));
        if let Err(err) = self.run::<()>(cmd).await {
            warn!(key, error = %err, "redis DEL failed");
        }
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> bool {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1));
        match self.run::<Option<String>>(cmd).await {
            Ok(reply) => reply.is_some(),
            Err(err) => {
                warn!(key, error = %err, "redis SETNX failed, lock not acquired");
                false
            }
        }
    }

    async fn sadd(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let key = self.full_key(key);
        let mut cmd = redis::cmd("SADD");
        cmd.arg(&key);
        for member in members {
            cmd.arg(member);
        }
        self.run::<()>(cmd).await?;
        if let Some(ttl) = ttl {
            let mut expire = redis::cmd("EXPIRE");
            expire.arg(&key).arg(ttl.as_secs().max(1));
            self.run::<()>(expire).await?;
        }
        Ok(())
    }

    async fn scard(&self, key: &str) -> u64 {
        let mut cmd = redis::cmd("SCARD");
        cmd.arg(self.full_key(key));
        match self.run::<u64>(cmd).await {
            Ok(count) => count,
            Err(err) => {
                warn!(key, error = %err, "redis SCARD failed, treating as empty");
                0
            }
        }
    }

    async fn clear(&self) {
        if let Err(err) = self.run::<()>(redis::cmd("FLUSHDB")).await {
            warn!(error = %err, "redis FLUSHDB failed");
        }
    }
}

/// Build the cache selected by the configuration.
pub async fn cache_from_config(
    cache: &CacheConfig,
    prefix: &str,
) -> Result<Arc<dyn KvCache>, CacheError> {
    match cache {
        CacheConfig::Local => Ok(Arc::new(MemoryCache::new(prefix))),
        CacheConfig::Redis {
            host,
            port,
            password,
            use_tls,
        } => Ok(Arc::new(
            RedisCache::connect(host, *port, password.as_deref(), *use_tls, prefix).await?,
        )),
    }
}

//! Redis-backed counter store.
//!
//! Connections are borrowed from a deadpool pool for the duration of a
//! single command and released immediately; the store holds no long-lived
//! connection state. Script atomicity comes from Redis itself: an EVALSHA
//! runs as one uninterruptible unit on the server.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::ErrorKind;

use super::{CounterStore, KeyExpiry, ScriptHash, StoreError};
use crate::config::RedisConfig;

/// Counter store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Create a store from a Redis URL, with default pool settings.
    pub fn new(url: impl Into<String>) -> Result<Self, StoreError> {
        let cfg = PoolConfig::from_url(url.into());
        Self::create(cfg)
    }

    /// Create a store from deployment configuration, honoring the
    /// configured pool size.
    pub fn from_config(config: &RedisConfig) -> Result<Self, StoreError> {
        let mut cfg = PoolConfig::from_url(config.url.clone());
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));
        Self::create(cfg)
    }

    fn create(cfg: PoolConfig) -> Result<Self, StoreError> {
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis pool: {}", e)))?;
        Ok(Self { pool })
    }

    /// Create a store around an existing pool, for callers that manage
    /// pooling themselves.
    pub fn with_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn map_redis_error(e: redis::RedisError) -> StoreError {
    if e.kind() == ErrorKind::NoScriptError {
        StoreError::ScriptMissing
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn load_script(&self, source: &str) -> Result<ScriptHash, StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async::<String>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn run_script(&self, hash: &str, key: &str, args: &[i64]) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(hash).arg(1).arg(key);
        for arg in args {
            cmd.arg(*arg);
        }
        cmd.query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn increment_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("INCRBY")
            .arg(key)
            .arg(amount)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<KeyExpiry, StoreError> {
        let mut conn = self.connection().await?;
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        // PTTL reply convention: -2 no key, -1 key without expiry.
        Ok(match pttl {
            -2 => KeyExpiry::Missing,
            -1 => KeyExpiry::Unset,
            ms if ms >= 0 => KeyExpiry::After(Duration::from_millis(ms as u64)),
            other => {
                return Err(StoreError::UnexpectedReply(format!(
                    "PTTL returned {}",
                    other
                )))
            }
        })
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async::<bool>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<i64>>(&mut conn)
            .await
            .map_err(map_redis_error)
    }
}

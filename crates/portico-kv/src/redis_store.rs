//! Redis-backed store with connection management and bounded op latency.

use crate::{KvError, KvResult, KvStore};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

/// Every round-trip is bounded so a slow Redis degrades features instead
/// of stalling the request pipeline.
const OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Redis client with automatic reconnection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis. Supports both redis:// and rediss:// (TLS) URLs.
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url).map_err(|e| KvError(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn bounded<T>(
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> KvResult<T> {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(KvError(e.to_string())),
            Err(_) => Err(KvError(format!(
                "redis operation exceeded {}ms",
                OP_TIMEOUT.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        Self::bounded(async move { conn.get(key).await }).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let value = value.to_string();
        Self::bounded(async move { conn.set_ex(key, value, ttl_secs).await }).await
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        Self::bounded(async move { conn.del(key).await }).await
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = Self::bounded(async move { conn.incr(key, 1).await }).await?;

        // Expiry only on the first increment of a window
        if count == 1 {
            let mut conn = self.conn.clone();
            let _: bool =
                Self::bounded(async move { conn.expire(key, ttl_secs as i64).await }).await?;
        }

        Ok(count)
    }
}

// ============================================================================
// Portico KV - TTL-scoped key/value store behind a narrow trait
// ============================================================================
//
// The rate limiter and the response cache share this surface. The Redis
// implementation is the production store; the in-memory implementation
// backs tests and single-process development.
//
// Callers treat every KvError as a degradation signal, never a hard
// failure: the limiter fails open and the cache misses.
//
// ============================================================================

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("kv operation failed: {0}")]
pub struct KvError(pub String);

pub type KvResult<T> = Result<T, KvError>;

/// Narrow key/value interface: TTL-scoped reads, writes and atomic counters.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// GET - value by key, `None` when absent or expired
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// SETEX - set key to value with expiry
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()>;

    /// DEL - remove a key
    async fn del(&self, key: &str) -> KvResult<()>;

    /// Atomically increment, applying `ttl_secs` on the first increment of
    /// the key's lifetime. Returns the post-increment value.
    async fn incr(&self, key: &str, ttl_secs: u64) -> KvResult<i64>;
}

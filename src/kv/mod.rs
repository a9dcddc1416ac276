/// Key/value store seam
///
/// The core only ever talks to the store through [`KvStore`]. Two backends exist:
/// - [`RedisStore`]: a Redis-compatible engine reached through a bounded connection pool
/// - [`MemoryStore`]: a process-local engine with the same observable semantics, used
///   by tests and local development

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, RedisStoreConfig};

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("wrong type for key {0}")]
    WrongType(String),

    #[error("value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("store state poisoned")]
    Poisoned,
}

pub type KvResult<T> = Result<T, StoreError>;

/// Primitives of a Redis-compatible engine used by the core
///
/// List and sorted-set reads always return the full collection; callers never page.
#[async_trait]
pub trait KvStore: Send + Sync {
    // ----- strings -----

    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Values in key order; absent keys yield `None`
    async fn mget(&self, keys: &[String]) -> KvResult<Vec<Option<String>>>;

    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// SET NX; true when the key was written
    async fn set_nx(&self, key: &str, value: &str) -> KvResult<bool>;

    /// SET XX; true when the key existed and was overwritten
    async fn set_xx(&self, key: &str, value: &str) -> KvResult<bool>;

    /// SET NX EX; true when the key was written
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<bool>;

    /// Number of keys removed
    async fn del(&self, keys: &[String]) -> KvResult<u64>;

    async fn exists(&self, key: &str) -> KvResult<bool>;

    async fn incr(&self, key: &str) -> KvResult<i64>;

    async fn decr(&self, key: &str) -> KvResult<i64>;

    /// True when a timeout was set
    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool>;

    /// Remaining seconds; -1 when the key has no expiry, -2 when it does not exist
    async fn ttl(&self, key: &str) -> KvResult<i64>;

    // ----- lists -----

    async fn lpush(&self, key: &str, value: &str) -> KvResult<()>;

    /// Removes every occurrence of `value`
    async fn lrem(&self, key: &str, value: &str) -> KvResult<u64>;

    async fn lrange(&self, key: &str) -> KvResult<Vec<String>>;

    // ----- sorted sets -----

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> KvResult<()>;

    async fn zrem(&self, key: &str, members: &[String]) -> KvResult<u64>;

    /// Highest score first; equal scores in reverse lexicographic member order
    async fn zrevrange_with_scores(&self, key: &str) -> KvResult<Vec<(String, f64)>>;

    async fn zscore(&self, key: &str, member: &str) -> KvResult<Option<f64>>;

    // ----- sets -----

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()>;

    async fn srem(&self, key: &str, member: &str) -> KvResult<()>;

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>>;

    // ----- hashes -----

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> KvResult<()>;

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>>;

    // ----- geo -----

    async fn geo_add(&self, key: &str, longitude: f64, latitude: f64, member: &str) -> KvResult<()>;

    async fn geo_remove(&self, key: &str, member: &str) -> KvResult<()>;

    /// Members within `radius_m` meters, nearest first
    async fn geo_radius(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> KvResult<Vec<String>>;

    /// Connectivity check
    async fn ping(&self) -> KvResult<()>;
}

/// Redis backend for the key/value seam
///
/// A single multiplexed `ConnectionManager` carries every command; a FIFO semaphore
/// bounds how many commands are in flight at once, which is the checkout bound of the
/// connection pool.
use super::{KvResult, KvStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

/// Redis backend configuration
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of concurrent commands (default: 64)
    pub pool_size: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 64,
        }
    }
}

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    permits: Arc<Semaphore>,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: &RedisStoreConfig) -> KvResult<Self> {
        info!("Connecting to Redis at {}", config.url);

        let client = Client::open(config.url.as_str()).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            StoreError::Redis(e)
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            StoreError::Redis(e)
        })?;

        info!(pool_size = config.pool_size, "Redis connection established");

        Ok(Self {
            connection,
            permits: Arc::new(Semaphore::new(config.pool_size.max(1))),
        })
    }

    /// Check out a connection slot for one command
    async fn checkout(&self) -> KvResult<(SemaphorePermit<'_>, ConnectionManager)> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StoreError::PoolClosed)?;
        Ok((permit, self.connection.clone()))
    }
}

fn log_failure(op: &str, key: &str, e: redis::RedisError) -> StoreError {
    warn!("Redis {} failed for {}: {}", op, key, e);
    StoreError::Redis(e)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        debug!("KV GET: {}", key);
        let (_permit, mut conn) = self.checkout().await?;
        conn.get(key).await.map_err(|e| log_failure("GET", key, e))
    }

    async fn mget(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let (_permit, mut conn) = self.checkout().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| log_failure("MGET", &keys[0], e))?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        debug!("KV SET: {}", key);
        let (_permit, mut conn) = self.checkout().await?;
        conn.set(key, value)
            .await
            .map_err(|e| log_failure("SET", key, e))
    }

    async fn set_nx(&self, key: &str, value: &str) -> KvResult<bool> {
        debug!("KV SETNX: {}", key);
        let (_permit, mut conn) = self.checkout().await?;
        conn.set_nx(key, value)
            .await
            .map_err(|e| log_failure("SETNX", key, e))
    }

    async fn set_xx(&self, key: &str, value: &str) -> KvResult<bool> {
        debug!("KV SET XX: {}", key);
        let (_permit, mut conn) = self.checkout().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(|e| log_failure("SET XX", key, e))?;
        Ok(reply.is_some())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<bool> {
        let (_permit, mut conn) = self.checkout().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| log_failure("SET NX EX", key, e))?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[String]) -> KvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        debug!("KV DEL: {:?}", keys);
        let (_permit, mut conn) = self.checkout().await?;
        conn.del(keys)
            .await
            .map_err(|e| log_failure("DEL", &keys[0], e))
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.exists(key)
            .await
            .map_err(|e| log_failure("EXISTS", key, e))
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.incr(key, 1)
            .await
            .map_err(|e| log_failure("INCR", key, e))
    }

    async fn decr(&self, key: &str) -> KvResult<i64> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.decr(key, 1)
            .await
            .map_err(|e| log_failure("DECR", key, e))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.expire(key, ttl_secs as i64)
            .await
            .map_err(|e| log_failure("EXPIRE", key, e))
    }

    async fn ttl(&self, key: &str) -> KvResult<i64> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.ttl(key).await.map_err(|e| log_failure("TTL", key, e))
    }

    async fn lpush(&self, key: &str, value: &str) -> KvResult<()> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.lpush(key, value)
            .await
            .map_err(|e| log_failure("LPUSH", key, e))
    }

    async fn lrem(&self, key: &str, value: &str) -> KvResult<u64> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.lrem(key, 0, value)
            .await
            .map_err(|e| log_failure("LREM", key, e))
    }

    async fn lrange(&self, key: &str) -> KvResult<Vec<String>> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.lrange(key, 0, -1)
            .await
            .map_err(|e| log_failure("LRANGE", key, e))
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> KvResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let (_permit, mut conn) = self.checkout().await?;
        conn.zadd_multiple(key, members)
            .await
            .map_err(|e| log_failure("ZADD", key, e))
    }

    async fn zrem(&self, key: &str, members: &[String]) -> KvResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let (_permit, mut conn) = self.checkout().await?;
        conn.zrem(key, members)
            .await
            .map_err(|e| log_failure("ZREM", key, e))
    }

    async fn zrevrange_with_scores(&self, key: &str) -> KvResult<Vec<(String, f64)>> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.zrevrange_withscores(key, 0, -1)
            .await
            .map_err(|e| log_failure("ZREVRANGE", key, e))
    }

    async fn zscore(&self, key: &str, member: &str) -> KvResult<Option<f64>> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.zscore(key, member)
            .await
            .map_err(|e| log_failure("ZSCORE", key, e))
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.sadd(key, member)
            .await
            .map_err(|e| log_failure("SADD", key, e))
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<()> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.srem(key, member)
            .await
            .map_err(|e| log_failure("SREM", key, e))
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.smembers(key)
            .await
            .map_err(|e| log_failure("SMEMBERS", key, e))
    }

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> KvResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let (_permit, mut conn) = self.checkout().await?;
        conn.hset_multiple(key, fields)
            .await
            .map_err(|e| log_failure("HSET", key, e))
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        let (_permit, mut conn) = self.checkout().await?;
        conn.hgetall(key)
            .await
            .map_err(|e| log_failure("HGETALL", key, e))
    }

    async fn geo_add(&self, key: &str, longitude: f64, latitude: f64, member: &str) -> KvResult<()> {
        let (_permit, mut conn) = self.checkout().await?;
        let _: i64 = redis::cmd("GEOADD")
            .arg(key)
            .arg(longitude)
            .arg(latitude)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| log_failure("GEOADD", key, e))?;
        Ok(())
    }

    async fn geo_remove(&self, key: &str, member: &str) -> KvResult<()> {
        // Geo indexes are sorted sets underneath
        let (_permit, mut conn) = self.checkout().await?;
        let _: i64 = conn
            .zrem(key, member)
            .await
            .map_err(|e| log_failure("ZREM", key, e))?;
        Ok(())
    }

    async fn geo_radius(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> KvResult<Vec<String>> {
        let (_permit, mut conn) = self.checkout().await?;
        let members: Vec<String> = redis::cmd("GEORADIUS")
            .arg(key)
            .arg(longitude)
            .arg(latitude)
            .arg(radius_m)
            .arg("m")
            .arg("ASC")
            .query_async(&mut conn)
            .await
            .map_err(|e| log_failure("GEORADIUS", key, e))?;
        Ok(members)
    }

    async fn ping(&self) -> KvResult<()> {
        let (_permit, mut conn) = self.checkout().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            error!("Redis PING failed: {}", e);
            StoreError::Redis(e)
        })?;

        if pong != "PONG" {
            return Err(StoreError::WrongType("PING".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.pool_size, 64);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let config = RedisStoreConfig {
            url: "not-a-redis-url".to_string(),
            pool_size: 4,
        };
        assert!(RedisStore::connect(&config).await.is_err());
    }
}

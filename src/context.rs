/// Application context and dependency injection
use crate::{
    auth::SessionManager,
    config::{ServerConfig, StorageBackend},
    error::TapglueResult,
    feed::{FanoutWorker, FeedEngine},
    graph::ConnectionEngine,
    kv::{KvStore, MemoryStore, RedisStore, RedisStoreConfig},
    minter::PasswordHasher,
    rate_limit::{FloodGuard, RateLimiter},
    store::EntityStore,
};
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub kv: Arc<dyn KvStore>,
    pub store: EntityStore,
    pub feed: FeedEngine,
    pub graph: ConnectionEngine,
    pub sessions: SessionManager,
    // Per-application quotas
    pub limiter: RateLimiter,
    // Process-wide guard ahead of everything else
    pub flood_guard: FloodGuard,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> TapglueResult<Self> {
        config.validate()?;

        let kv: Arc<dyn KvStore> = match config.storage.backend {
            StorageBackend::Redis => {
                let redis = RedisStore::connect(&RedisStoreConfig {
                    url: config.storage.redis_url.clone(),
                    pool_size: config.storage.pool_size,
                })
                .await?;
                Arc::new(redis)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(config, kv)
    }

    /// Build the context over an existing store; spawns the fan-out worker
    pub fn with_store(config: ServerConfig, kv: Arc<dyn KvStore>) -> TapglueResult<Self> {
        config.validate()?;

        let store = EntityStore::new(
            kv.clone(),
            PasswordHasher::new(config.authentication.password_pepper.clone()),
        );

        let (queue, _worker) = FanoutWorker::spawn(kv.clone(), config.feed.fanout_queue_capacity);
        let feed = FeedEngine::new(kv.clone()).with_fanout_queue(queue, config.feed.inline_fanout);

        let graph = ConnectionEngine::new(store.clone(), feed.clone());
        let sessions = SessionManager::new(
            store.clone(),
            config.authentication.operator_session_ttl_secs,
            config.authentication.end_user_session_ttl_secs,
        );

        let limiter = RateLimiter::new(
            kv.clone(),
            config.rate_limit.application_limit,
            config.rate_limit.application_window_secs,
        );
        let flood_guard = if config.rate_limit.enabled {
            FloodGuard::new(
                config.rate_limit.global_requests_per_second,
                config.rate_limit.global_burst,
            )
        } else {
            FloodGuard::disabled()
        };

        tracing::info!(
            backend = ?config.storage.backend,
            inline_fanout = config.feed.inline_fanout,
            "Application context initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            kv,
            store,
            feed,
            graph,
            sessions,
            limiter,
            flood_guard,
        })
    }
}

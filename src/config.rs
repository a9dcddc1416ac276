/// Configuration management for the Tapglue backend
use crate::error::{TapglueError, TapglueResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Sent back in `X-Tapglue-Revision`
    pub revision: String,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

/// Which key/value backend to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = TapglueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(TapglueError::BadRequest(format!("unknown storage backend {}", other))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub redis_url: String,
    pub pool_size: usize,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing)]
    pub password_pepper: String,
    pub operator_session_ttl_secs: u64,
    pub end_user_session_ttl_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per application per window
    pub application_limit: u32,
    pub application_window_secs: u64,
    /// In-process flood guard over every request
    pub global_requests_per_second: u32,
    pub global_burst: u32,
}

/// Feed fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub inline_fanout: usize,
    pub fanout_queue_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &str, default: &str) -> TapglueResult<T> {
    var_or(name, default)
        .parse()
        .map_err(|_| TapglueError::BadRequest(format!("invalid value for {}", name)))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8082,
                revision: "dev".to_string(),
                request_timeout_secs: 10,
                max_body_bytes: 32 * 1024,
            },
            storage: StorageConfig {
                backend: StorageBackend::Redis,
                redis_url: "redis://127.0.0.1:6379".to_string(),
                pool_size: 64,
            },
            authentication: AuthConfig {
                password_pepper: String::new(),
                operator_session_ttl_secs: 30 * 24 * 3600,
                end_user_session_ttl_secs: 90 * 24 * 3600,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                application_limit: 10_000,
                application_window_secs: 60,
                global_requests_per_second: 2_000,
                global_burst: 500,
            },
            feed: FeedConfig {
                inline_fanout: crate::feed::DEFAULT_INLINE_FANOUT,
                fanout_queue_capacity: 1_024,
            },
            logging: LoggingConfig {
                level: "tapglue=debug,tower_http=debug".to_string(),
                json: false,
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> TapglueResult<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let service = ServiceConfig {
            hostname: var_or("TAPGLUE_HOSTNAME", &defaults.service.hostname),
            port: parsed("TAPGLUE_PORT", "8082")?,
            revision: var_or("TAPGLUE_REVISION", &defaults.service.revision),
            request_timeout_secs: parsed("TAPGLUE_REQUEST_TIMEOUT_SECS", "10")?,
            max_body_bytes: parsed("TAPGLUE_MAX_BODY_BYTES", "32768")?,
        };

        let storage = StorageConfig {
            backend: parsed("TAPGLUE_STORAGE_BACKEND", "redis")?,
            redis_url: var_or("TAPGLUE_REDIS_URL", &defaults.storage.redis_url),
            pool_size: parsed("TAPGLUE_REDIS_POOL_SIZE", "64")?,
        };

        let authentication = AuthConfig {
            password_pepper: env::var("TAPGLUE_PASSWORD_PEPPER")
                .map_err(|_| TapglueError::BadRequest("TAPGLUE_PASSWORD_PEPPER is required".to_string()))?,
            operator_session_ttl_secs: parsed("TAPGLUE_OPERATOR_SESSION_TTL_SECS", "2592000")?,
            end_user_session_ttl_secs: parsed("TAPGLUE_USER_SESSION_TTL_SECS", "7776000")?,
        };

        let rate_limit = RateLimitConfig {
            enabled: parsed("TAPGLUE_RATE_LIMITS_ENABLED", "true")?,
            application_limit: parsed("TAPGLUE_RATE_LIMIT_APPLICATION", "10000")?,
            application_window_secs: parsed("TAPGLUE_RATE_LIMIT_WINDOW_SECS", "60")?,
            global_requests_per_second: parsed("TAPGLUE_RATE_LIMIT_GLOBAL_RPS", "2000")?,
            global_burst: parsed("TAPGLUE_RATE_LIMIT_GLOBAL_BURST", "500")?,
        };

        let feed = FeedConfig {
            inline_fanout: parsed("TAPGLUE_FEED_INLINE_FANOUT", "10000")?,
            fanout_queue_capacity: parsed("TAPGLUE_FEED_QUEUE_CAPACITY", "1024")?,
        };

        let logging = LoggingConfig {
            level: var_or("RUST_LOG", &defaults.logging.level),
            json: parsed("TAPGLUE_LOG_JSON", "false")?,
        };

        Ok(ServerConfig {
            service,
            storage,
            authentication,
            rate_limit,
            feed,
            logging,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> TapglueResult<()> {
        if self.service.hostname.is_empty() {
            return Err(TapglueError::BadRequest("hostname cannot be empty".to_string()));
        }

        if self.authentication.password_pepper.len() < 16 {
            return Err(TapglueError::BadRequest(
                "password pepper must be at least 16 characters".to_string(),
            ));
        }

        if self.storage.pool_size == 0 {
            return Err(TapglueError::BadRequest("redis pool size must be positive".to_string()));
        }

        if self.service.max_body_bytes == 0 || self.service.request_timeout_secs == 0 {
            return Err(TapglueError::BadRequest("service limits must be positive".to_string()));
        }

        if self.rate_limit.enabled
            && (self.rate_limit.application_limit == 0 || self.rate_limit.application_window_secs == 0)
        {
            return Err(TapglueError::BadRequest("rate limits must be positive".to_string()));
        }

        if self.feed.inline_fanout == 0 || self.feed.fanout_queue_capacity == 0 {
            return Err(TapglueError::BadRequest("feed limits must be positive".to_string()));
        }

        if self.authentication.operator_session_ttl_secs == 0 || self.authentication.end_user_session_ttl_secs == 0 {
            return Err(TapglueError::BadRequest("session ttl must be positive".to_string()));
        }

        Ok(())
    }
}

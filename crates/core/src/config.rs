//! Environment-driven configuration with defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Full process configuration, loaded once at startup and passed into the
/// services at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub parse: ParseConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: String,
    pub db: i64,
}

impl RedisConfig {
    /// Connection URL for the redis client.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

/// Broker wiring and the worker's retry budget.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Stream key for the job topic
    pub topic: String,
    /// Consumer group shared by the worker pool
    pub group: String,
    /// Retries after the first attempt (attempts = retry_max + 1)
    pub retry_max: u32,
    /// Fixed sleep between attempts
    pub retry_backoff: Duration,
    /// Simulated latency of the test-job handler
    pub processing_time: Duration,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration: Duration,
}

/// Static credential pair accepted by the login endpoint.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub temp_dir: PathBuf,
    pub max_size: u64,
    /// Staging lifetime; also the TTL of cached payloads and results
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Per-document retry budget inside the parse handler
    pub max_retries: u32,
    /// Default webhook target; the per-job URL overrides it
    pub webhook_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env_parse("SERVER_PORT", 8080),
                shutdown_timeout: Duration::from_secs(env_parse("SERVER_SHUTDOWN_TIMEOUT", 5)),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "postgres://localhost/conveyor"),
            },
            redis: RedisConfig {
                addr: env_or("REDIS_ADDR", "localhost:6379"),
                password: env_or("REDIS_PASSWORD", ""),
                db: env_parse("REDIS_DB", 0),
            },
            queue: QueueConfig {
                topic: env_or("QUEUE_TOPIC", "jobs"),
                group: env_or("QUEUE_GROUP", "job-workers"),
                retry_max: env_parse("QUEUE_RETRY_MAX", 5),
                retry_backoff: Duration::from_millis(env_parse("QUEUE_RETRY_BACKOFF", 500)),
                processing_time: Duration::from_millis(env_parse("QUEUE_PROCESSING_TIME", 10_000)),
            },
            jwt: JwtConfig {
                secret: env_or("JWT_SECRET", "supersecretkey"),
                expiration: Duration::from_secs(env_parse("JWT_EXPIRATION", 72) * 3600),
            },
            auth: AuthConfig {
                email: env_or("AUTH_EMAIL", "admin"),
                password: env_or("AUTH_PASSWORD", "password"),
            },
            storage: StorageConfig {
                temp_dir: PathBuf::from(env_or("STORAGE_TEMP_DIR", "/tmp/conveyor")),
                max_size: env_parse("STORAGE_MAX_SIZE", 10 * 1024 * 1024),
                ttl: Duration::from_secs(env_parse("STORAGE_TTL", 86_400)),
            },
            parse: ParseConfig {
                max_retries: env_parse("PARSE_MAX_RETRIES", 3),
                webhook_url: std::env::var("PARSE_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
                gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty()),
                gemini_model: env_or("GEMINI_MODEL", "gemini-2.0-flash"),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

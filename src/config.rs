/// Configuration management for Murmur
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors surfaced at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub fanout: FanoutConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Deadline applied to every request, in seconds
    pub request_timeout_secs: u64,
}

/// Which storage layout backs the engines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackend {
    /// Relational layout
    Sqlite {
        path: PathBuf,
        max_connections: u32,
    },
    /// Key-value layout
    Redis { url: String, key_prefix: String },
    /// Process memory, lost on restart
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// Where rate-limit counters live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Local,
    Redis,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: RateLimitBackend,
    /// Redis URL for the shared backend
    pub redis_url: String,
    pub window_secs: u64,
    /// Requests per window for applications not in production
    pub staging_limit: u32,
    /// Requests per window for applications in production
    pub production_limit: u32,
}

/// Session collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Random bytes per minted token
    pub token_bytes: usize,
    /// Argon2 memory cost in KiB
    pub password_memory_kib: u32,
    pub password_iterations: u32,
}

/// Fan-out tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Maximum followers written per event, 0 for unbounded
    pub follower_cap: usize,
    /// Batch size for set scans
    pub scan_batch: usize,
}

impl FanoutConfig {
    pub fn cap(&self) -> Option<usize> {
        (self.follower_cap > 0).then_some(self.follower_cap)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let hostname = env_or("MURMUR_HOSTNAME", "0.0.0.0");
        let port = parse_env("MURMUR_PORT", 8083u16)?;
        let version = env_or("MURMUR_VERSION", env!("CARGO_PKG_VERSION"));
        let request_timeout_secs = parse_env("MURMUR_REQUEST_TIMEOUT", 30u64)?;

        let redis_url = env_or("MURMUR_REDIS_URL", "redis://localhost:6379");
        let backend = match env_or("MURMUR_STORAGE_BACKEND", "sqlite").as_str() {
            "sqlite" => StorageBackend::Sqlite {
                path: env_or("MURMUR_SQLITE_PATH", "./data/murmur.sqlite").into(),
                max_connections: parse_env("MURMUR_SQLITE_MAX_CONNECTIONS", 10u32)?,
            },
            "redis" => StorageBackend::Redis {
                url: redis_url.clone(),
                key_prefix: env_or("MURMUR_REDIS_KEY_PREFIX", ""),
            },
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "MURMUR_STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let rate_limit_backend = match env_or("MURMUR_RATE_LIMIT_BACKEND", "local").as_str() {
            "local" => RateLimitBackend::Local,
            "redis" => RateLimitBackend::Redis,
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "MURMUR_RATE_LIMIT_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                request_timeout_secs,
            },
            storage: StorageConfig { backend },
            rate_limit: RateLimitConfig {
                enabled: parse_env("MURMUR_RATE_LIMITS_ENABLED", true)?,
                backend: rate_limit_backend,
                redis_url,
                window_secs: parse_env("MURMUR_RATE_LIMIT_WINDOW", 60u64)?,
                staging_limit: parse_env("MURMUR_RATE_LIMIT_STAGING", 100u32)?,
                production_limit: parse_env("MURMUR_RATE_LIMIT_PRODUCTION", 20_000u32)?,
            },
            session: SessionConfig {
                token_bytes: parse_env("MURMUR_SESSION_TOKEN_BYTES", 32usize)?,
                password_memory_kib: parse_env("MURMUR_PASSWORD_MEMORY_KIB", 19_456u32)?,
                password_iterations: parse_env("MURMUR_PASSWORD_ITERATIONS", 2u32)?,
            },
            fanout: FanoutConfig {
                follower_cap: parse_env("MURMUR_FANOUT_FOLLOWER_CAP", 0usize)?,
                scan_batch: parse_env("MURMUR_FANOUT_SCAN_BATCH", 300usize)?,
            },
            logging: LoggingConfig {
                level: env_or("RUST_LOG", "info"),
                json: env_or("MURMUR_LOG_FORMAT", "text") == "json",
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.hostname.is_empty() {
            return Err(ConfigError::Invalid("Hostname cannot be empty".to_string()));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "Rate limit window must be at least one second".to_string(),
            ));
        }

        if self.rate_limit.staging_limit == 0 || self.rate_limit.production_limit == 0 {
            return Err(ConfigError::Invalid(
                "Rate limits must be greater than zero".to_string(),
            ));
        }

        if self.session.token_bytes < 16 {
            return Err(ConfigError::Invalid(
                "Session tokens need at least 16 random bytes".to_string(),
            ));
        }

        if self.fanout.scan_batch == 0 {
            return Err(ConfigError::Invalid(
                "Fan-out scan batch must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// In-memory configuration used by tests and local experiments
    pub fn for_memory() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                version: env!("CARGO_PKG_VERSION").to_string(),
                request_timeout_secs: 30,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                backend: RateLimitBackend::Local,
                redis_url: "redis://localhost:6379".to_string(),
                window_secs: 60,
                staging_limit: 100,
                production_limit: 20_000,
            },
            session: SessionConfig {
                token_bytes: 32,
                password_memory_kib: 1024,
                password_iterations: 1,
            },
            fanout: FanoutConfig {
                follower_cap: 0,
                scan_batch: 300,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_is_valid() {
        let config = ServerConfig::for_memory();
        assert!(config.validate().is_ok());
        assert_eq!(config.fanout.cap(), None);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = ServerConfig::for_memory();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_follower_cap() {
        let mut config = ServerConfig::for_memory();
        config.fanout.follower_cap = 5000;
        assert_eq!(config.fanout.cap(), Some(5000));
    }
}

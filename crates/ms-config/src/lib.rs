//! Messaging System Configuration
//!
//! TOML-based configuration with environment variable overrides. Every
//! section has defaults, so an empty file (or no file) yields a runnable
//! development setup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub http: HttpConfig,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub webhook: WebhookConfig,
    pub processor: ProcessorConfig,

    /// Use in-memory store and cache instead of MongoDB/Redis
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "messaging-system".to_string(),
            http: HttpConfig::default(),
            mongodb: MongoConfig::default(),
            redis: RedisConfig::default(),
            webhook: WebhookConfig::default(),
            processor: ProcessorConfig::default(),
            dev_mode: false,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// MongoDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub message_collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "messaging".to_string(),
            message_collection: "messages".to_string(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Lifetime of cached delivery records
    pub ttl_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl RedisConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Delivery webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Full endpoint URL messages are POSTed to
    pub url: String,
    /// Sent as the `x-ins-auth-key` header
    pub api_key: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/webhook".to_string(),
            api_key: String::new(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Dispatch processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub poll_interval_secs: u64,
    /// Unsent messages fetched per pass
    pub batch_size: u32,
    /// Upper bound for each store/webhook/cache call inside a pass
    pub call_timeout_secs: u64,
    /// Start dispatching immediately instead of waiting for POST /processor/start
    pub auto_start: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 120,
            batch_size: 2,
            call_timeout_secs: 30,
            auto_start: false,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject settings the processor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "processor.batch_size must be greater than 0".into(),
            ));
        }
        if self.processor.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "processor.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.processor.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "processor.call_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.redis.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "redis.ttl_secs must be greater than 0".into(),
            ));
        }
        if self.webhook.url.trim().is_empty() {
            return Err(ConfigError::ValidationError("webhook.url is required".into()));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Messaging System Configuration
# Environment variables (MESSAGING_<SECTION>_<KEY>) override these settings

app_name = "messaging-system"
dev_mode = false

[http]
host = "0.0.0.0"
port = 8080

[mongodb]
uri = "mongodb://localhost:27017"
database = "messaging"
message_collection = "messages"

[redis]
url = "redis://localhost:6379"
ttl_secs = 86400

[webhook]
url = "http://localhost:9000/webhook"
api_key = ""
connect_timeout_secs = 10
request_timeout_secs = 30

[processor]
poll_interval_secs = 120
batch_size = 2
call_timeout_secs = 30
auto_start = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.processor.batch_size, 2);
        assert_eq!(config.processor.poll_interval(), Duration::from_secs(120));
        assert_eq!(config.redis.ttl(), Duration::from_secs(86400));
        assert!(!config.processor.auto_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_toml_parses_to_defaults() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.mongodb.database, defaults.mongodb.database);
        assert_eq!(config.webhook.url, defaults.webhook.url);
        assert_eq!(config.processor.call_timeout_secs, defaults.processor.call_timeout_secs);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[processor]\nbatch_size = 5\n\n[webhook]\napi_key = \"secret\"").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.processor.batch_size, 5);
        assert_eq!(config.processor.poll_interval_secs, 120);
        assert_eq!(config.webhook.api_key, "secret");
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[processor\nbatch_size = ").unwrap();
        assert!(matches!(AppConfig::from_file(file.path()), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let mut config = AppConfig::default();
        config.processor.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.processor.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.webhook.url = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.redis.ttl_secs = 0;
        assert!(config.validate().is_err());
    }
}

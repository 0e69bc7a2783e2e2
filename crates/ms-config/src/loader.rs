//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths, checked after the per-environment file
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "./config/config.toml",
    "/etc/messaging-system/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found), apply environment overrides,
    /// then validate the result
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                AppConfig::default()
            }
        };

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured path does not exist, falling back to search paths");
        }

        if let Ok(path) = env::var("MESSAGING_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let env_file = PathBuf::from(format!(".config/{}.toml", app_env));
        if env_file.exists() {
            return Some(env_file);
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

/// Apply `MESSAGING_<SECTION>_<KEY>` overrides read through `lookup`.
///
/// Values that fail to parse are ignored with a warning and the previous
/// setting is kept.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("MESSAGING_APP_NAME") {
        config.app_name = val;
    }
    parse_into(&lookup, "MESSAGING_DEV_MODE", &mut config.dev_mode);

    // HTTP
    if let Some(val) = lookup("MESSAGING_HTTP_HOST") {
        config.http.host = val;
    }
    parse_into(&lookup, "MESSAGING_HTTP_PORT", &mut config.http.port);

    // MongoDB
    if let Some(val) = lookup("MESSAGING_MONGODB_URI") {
        config.mongodb.uri = val;
    }
    if let Some(val) = lookup("MESSAGING_MONGODB_DATABASE") {
        config.mongodb.database = val;
    }
    if let Some(val) = lookup("MESSAGING_MONGODB_MESSAGE_COLLECTION") {
        config.mongodb.message_collection = val;
    }

    // Redis
    if let Some(val) = lookup("MESSAGING_REDIS_URL") {
        config.redis.url = val;
    }
    parse_into(&lookup, "MESSAGING_REDIS_TTL_SECS", &mut config.redis.ttl_secs);

    // Webhook
    if let Some(val) = lookup("MESSAGING_WEBHOOK_URL") {
        config.webhook.url = val;
    }
    if let Some(val) = lookup("MESSAGING_WEBHOOK_API_KEY") {
        config.webhook.api_key = val;
    }
    parse_into(
        &lookup,
        "MESSAGING_WEBHOOK_CONNECT_TIMEOUT_SECS",
        &mut config.webhook.connect_timeout_secs,
    );
    parse_into(
        &lookup,
        "MESSAGING_WEBHOOK_REQUEST_TIMEOUT_SECS",
        &mut config.webhook.request_timeout_secs,
    );

    // Processor
    parse_into(
        &lookup,
        "MESSAGING_PROCESSOR_POLL_INTERVAL_SECS",
        &mut config.processor.poll_interval_secs,
    );
    parse_into(&lookup, "MESSAGING_PROCESSOR_BATCH_SIZE", &mut config.processor.batch_size);
    parse_into(
        &lookup,
        "MESSAGING_PROCESSOR_CALL_TIMEOUT_SECS",
        &mut config.processor.call_timeout_secs,
    );
    parse_into(&lookup, "MESSAGING_PROCESSOR_AUTO_START", &mut config.processor.auto_start);
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(val) = lookup(key) {
        match val.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DB_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 8;

/// Application configuration with validation.
///
/// Values are layered from `config/default.toml`, then
/// `config/{environment}.toml`, then `APP__*` environment variables
/// (e.g. `APP__DATABASE_URL`), later sources winning.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "database_url cannot be empty"))]
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}

fn default_db_min_connections() -> u32 {
    DEFAULT_DB_MIN_CONNECTIONS
}

fn default_db_connect_timeout_secs() -> u64 {
    DEFAULT_DB_CONNECT_TIMEOUT_SECS
}

fn default_db_idle_timeout_secs() -> u64 {
    DEFAULT_DB_IDLE_TIMEOUT_SECS
}

fn default_db_acquire_timeout_secs() -> u64 {
    DEFAULT_DB_ACQUIRE_TIMEOUT_SECS
}

impl AppConfig {
    /// Loads and validates configuration from files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("APP__ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder()
            .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
            .add_source(File::from(Path::new(CONFIG_DIR).join(&environment)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        // Empty database_url would otherwise only fail at connect time.
        builder = builder.set_default("environment", environment.clone())?;

        let config: AppConfig = builder.build()?.try_deserialize()?;

        config
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

        info!(
            environment = %config.environment,
            db_max_connections = config.db_max_connections,
            "configuration loaded"
        );

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

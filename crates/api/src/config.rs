use domain::services::ConfigurationEngineSettings;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> persistence::DatabaseConfig {
        persistence::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Limits and defaults of the configuration engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,

    #[serde(default = "default_schema_cache_capacity")]
    pub schema_cache_capacity: usize,

    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: i64,

    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,

    #[serde(default = "default_max_history_page_size")]
    pub max_history_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_value_bytes: default_max_value_bytes(),
            schema_cache_capacity: default_schema_cache_capacity(),
            expiring_soon_days: default_expiring_soon_days(),
            history_page_size: default_history_page_size(),
            max_history_page_size: default_max_history_page_size(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> ConfigurationEngineSettings {
        ConfigurationEngineSettings {
            max_value_bytes: self.max_value_bytes,
            schema_cache_capacity: self.schema_cache_capacity,
            expiring_soon_days: self.expiring_soon_days,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_max_value_bytes() -> usize {
    domain::value_objects::DEFAULT_MAX_VALUE_BYTES
}
fn default_schema_cache_capacity() -> usize {
    256
}
fn default_expiring_soon_days() -> i64 {
    30
}
fn default_history_page_size() -> u32 {
    shared::pagination::DEFAULT_PAGE_SIZE
}
fn default_max_history_page_size() -> u32 {
    shared::pagination::MAX_PAGE_SIZE
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml
    /// 2. config/local.toml (optional, not in git)
    /// 3. Environment variables with BIZCONF__ prefix, e.g. `BIZCONF__DATABASE__URL`
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("BIZCONF").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Built from embedded defaults so tests do not depend on config files.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            cors_origins = []

            [database]
            url = ""
            max_connections = 20
            min_connections = 2
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [engine]
            max_value_bytes = 1048576
            schema_cache_capacity = 256
            expiring_soon_days = 30
            history_page_size = 20
            max_history_page_size = 100
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Not validated, so tests can build partial configs.
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "BIZCONF__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigValidationError::InvalidValue(format!(
                "logging.format must be 'json' or 'pretty' (got '{}')",
                self.logging.format
            )));
        }

        let engine = &self.engine;
        if engine.max_value_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "engine.max_value_bytes must be positive".to_string(),
            ));
        }
        if engine.schema_cache_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "engine.schema_cache_capacity must be positive".to_string(),
            ));
        }
        if engine.expiring_soon_days <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "engine.expiring_soon_days must be positive".to_string(),
            ));
        }
        if engine.history_page_size == 0 || engine.history_page_size > engine.max_history_page_size {
            return Err(ConfigValidationError::InvalidValue(
                "engine.history_page_size must be between 1 and max_history_page_size".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigValidationError::InvalidValue(format!(
                    "invalid server address {}:{}",
                    self.server.host, self.server.port
                ))
            })
    }
}

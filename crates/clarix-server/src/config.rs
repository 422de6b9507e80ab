//! Configuration system for the Clarix server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, store, model, logging)
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values.

use clarix_duck::{ExecutionBudget, StoreDescriptor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// DuckDB database file
    pub database: String,

    /// Directory of tabular source files materialized at startup
    pub source_dir: String,

    /// Open query connections read-only
    pub read_only: bool,

    /// Upper bound on one statement, seconds
    pub timeout_secs: u64,

    /// Fail a query that returns more rows than this
    pub max_rows: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "data/clarix.duckdb".to_string(),
            source_dir: "data".to_string(),
            read_only: true,
            timeout_secs: 30,
            max_rows: Some(10_000),
        }
    }
}

impl StoreConfig {
    pub fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor::new(&self.database).with_read_only(self.read_only)
    }

    pub fn budget(&self) -> ExecutionBudget {
        ExecutionBudget {
            max_rows: self.max_rows,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier sent with every request
    pub name: String,

    /// Maximum output length, tokens
    pub max_tokens: u32,

    pub temperature: f32,

    /// Upper bound on one model call, seconds
    pub timeout_secs: u64,

    /// OpenAI-compatible endpoint; the public API when unset
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            max_tokens: 250,
            temperature: 0.0,
            timeout_secs: 30,
            api_base: None,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Schema document location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub path: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: "data/database_schema.json".to_string(),
        }
    }
}

/// Business rule set override; the built-in set is used when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub path: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub schema: SchemaConfig,
    pub rules: RulesConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `load` when the file exists, `from_env` otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Self::from_env()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CLARIX_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CLARIX_SERVER_PORT") {
            if let Ok(port_num) = port.parse() {
                self.server.port = port_num;
            }
        }

        if let Ok(database) = std::env::var("CLARIX_DATABASE") {
            self.store.database = database;
        }
        if let Ok(dir) = std::env::var("CLARIX_SOURCE_DIR") {
            self.store.source_dir = dir;
        }
        if let Ok(secs) = std::env::var("CLARIX_STORE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.store.timeout_secs = secs;
            }
        }

        if let Ok(path) = std::env::var("CLARIX_SCHEMA_PATH") {
            self.schema.path = path;
        }
        if let Ok(path) = std::env::var("CLARIX_RULES_PATH") {
            self.rules.path = Some(path);
        }

        if let Ok(model) = std::env::var("CLARIX_MODEL") {
            self.model.name = model;
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            self.model.api_base = Some(base);
        }
        if let Ok(secs) = std::env::var("CLARIX_MODEL_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.model.timeout_secs = secs;
            }
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
    }

    /// Both timeouts are mandatory; zero would mean "wait forever"
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid("model.timeout_secs must be > 0".to_string()));
        }
        if self.store.timeout_secs == 0 {
            return Err(ConfigError::Invalid("store.timeout_secs must be > 0".to_string()));
        }
        if self.model.max_tokens == 0 {
            return Err(ConfigError::Invalid("model.max_tokens must be > 0".to_string()));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.name must not be blank".to_string()));
        }
        Ok(())
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn get_openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.database, "data/clarix.duckdb");
        assert!(config.store.read_only);
        assert_eq!(config.model.max_tokens, 250);
        assert_eq!(config.model.timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
        assert!(config.rules.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("model:\n  name: \"gpt-4.1-mini\"\n").unwrap();
        assert_eq!(config.model.name, "gpt-4.1-mini");
        assert_eq!(config.model.max_tokens, 250);
        assert_eq!(config.store.timeout_secs, 30);
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = Config::default();
        config.model.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.store.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_var_override() {
        std::env::set_var("CLARIX_SERVER_PORT", "9090");
        std::env::set_var("CLARIX_MODEL", "local-sql-model");

        // Create a temp config file
        let config_yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
store:
  database: "data/test.duckdb"
  source_dir: "data"
  read_only: true
  timeout_secs: 5
model:
  name: "gpt-4o-mini"
  max_tokens: 250
  timeout_secs: 10
logging:
  level: "info"
  format: "pretty"
  output: "stdout"
  directory: "./logs"
"#;
        let dir = tempfile::tempdir().unwrap();
        let temp_file = dir.path().join("test_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.server.port, 9090); // Overridden
        assert_eq!(config.model.name, "local-sql-model"); // Overridden
        assert_eq!(config.store.timeout(), Duration::from_secs(5));
        assert_eq!(config.model.timeout(), Duration::from_secs(10));

        std::env::remove_var("CLARIX_SERVER_PORT");
        std::env::remove_var("CLARIX_MODEL");
    }
}

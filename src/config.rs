//! TOML configuration for askdb
//!
//! Settings come from `~/.config/askdb/config.toml` (or `--config`), then the
//! environment, then command-line flags.
use crate::ai_sql::config::{CompletionConfig, SchemaConfig};
use crate::database::validate_database_url;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine the home directory")]
    NoConfigDir,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[default]
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "default_console_output")]
    pub console_output: bool,
    #[serde(default = "default_file_output")]
    pub file_output: bool,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            console_output: default_console_output(),
            file_output: default_file_output(),
            file_path: default_log_file_path(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection URL (can also use DATABASE_URL or SUPABASE_DB_URL)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
    /// Hard cap on rows read per query; unset reads every row
    #[serde(default)]
    pub max_rows: Option<usize>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
            query_timeout_seconds: default_query_timeout(),
            max_rows: None,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field(
                "url",
                &self
                    .url
                    .as_deref()
                    .map(crate::password_sanitizer::sanitize_connection_url),
            )
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_seconds", &self.acquire_timeout_seconds)
            .field("query_timeout_seconds", &self.query_timeout_seconds)
            .field("max_rows", &self.max_rows)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.url.as_deref() {
            None => {
                return Err(
                    "Database URL not found. Set DATABASE_URL environment variable or configure [database].url"
                        .to_string(),
                );
            }
            Some(url) => validate_database_url(url).map_err(|e| e.to_string())?,
        }

        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.acquire_timeout_seconds == 0 {
            return Err("acquire_timeout_seconds must be greater than 0".to_string());
        }

        if self.query_timeout_seconds == 0 {
            return Err("query_timeout_seconds must be greater than 0".to_string());
        }

        if self.max_rows == Some(0) {
            return Err("max_rows must be greater than 0 when set".to_string());
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    15
}

fn default_query_timeout() -> u64 {
    30
}

fn default_console_output() -> bool {
    true
}

fn default_file_output() -> bool {
    false
}

fn default_log_file_path() -> String {
    // Use config directory + logs/askdb.log
    match Config::get_config_dir() {
        Ok(config_dir) => config_dir
            .join("logs")
            .join("askdb.log")
            .to_string_lossy()
            .to_string(),
        Err(_) => "askdb.log".to_string(),
    }
}

impl Config {
    /// `~/.config/askdb`
    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        home_dir()
            .map(|home| home.join(".config").join("askdb"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file yields the
    /// defaults; an unreadable or malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(ConfigError::Io {
                    path: config_path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "configuration file not found",
                    ),
                });
            }
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;

        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides. `DATABASE_URL` wins over `SUPABASE_DB_URL`; both
    /// win over the file, as does the provider's API key variable.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DATABASE_URL").or_else(|| non_empty("SUPABASE_DB_URL")) {
            self.database.url = Some(url);
        }

        self.completion.apply_env(non_empty);
    }

    /// Validate the sections needed to answer questions
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_database()?;
        self.completion.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Validate the sections needed for catalog-only commands
    pub fn validate_database(&self) -> Result<(), ConfigError> {
        self.database.validate().map_err(ConfigError::Invalid)?;
        self.schema.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

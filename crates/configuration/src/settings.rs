use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

/// Connection and pool parameters for the PostgreSQL backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Password,
    /// Name of the database to connect to.
    #[serde(default)]
    pub name: String,
    /// Schema every checked-out connection is pinned to.
    pub schema: String,
    /// Sessions opened eagerly when the pool is initialized.
    pub min_connections: u32,
    /// Hard cap on concurrently checked-out sessions.
    pub max_connections: u32,
    /// Acquisition attempts before giving up.
    pub acquire_attempts: u32,
    /// Base delay between acquisition attempts. Zero retries immediately.
    pub retry_backoff_ms: u64,
}

impl DatabaseSettings {
    /// Fails fast on missing credentials and inconsistent pool bounds.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        use crate::ConfigError;

        let required = [
            (self.host.as_str(), "host", "DB_HOST"),
            (self.user.as_str(), "user", "DB_USER"),
            (self.password.expose(), "password", "DB_PASSWORD"),
            (self.name.as_str(), "name", "DB_NAME"),
        ];
        for (value, field, var) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field, var));
            }
        }

        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "acquire_attempts must be at least 1".to_string(),
            ));
        }
        if !is_plain_identifier(&self.schema) {
            return Err(ConfigError::ValidationError(format!(
                "schema '{}' is not a plain SQL identifier",
                self.schema
            )));
        }
        Ok(())
    }

    /// `user@host:port/name`, safe to log.
    pub fn connection_target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }
}

/// Where and how verbosely the application logs.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// Directory holding the per-category audit files.
    pub dir: PathBuf,
    /// Console filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Whether to log to stderr in addition to the files.
    pub console: bool,
}

/// A password that never shows up in `Debug` output.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Command-line overrides, applied on top of every other source.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct SettingsOverrides {
    /// Path to an optional TOML configuration file.
    #[cfg_attr(feature = "clap", arg(long, global = true, default_value = "jec.toml"))]
    pub config: Option<PathBuf>,

    /// Schema to pin every connection to.
    #[cfg_attr(feature = "clap", arg(long, global = true))]
    pub schema: Option<String>,

    /// Maximum number of pooled connections.
    #[cfg_attr(feature = "clap", arg(long, global = true))]
    pub max_connections: Option<u32>,

    /// Console log filter (e.g. "debug", "jec::connections=info").
    #[cfg_attr(feature = "clap", arg(long, global = true))]
    pub log_level: Option<String>,
}

impl AppConfig {
    pub fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(schema) = &overrides.schema {
            self.database.schema = schema.clone();
        }
        if let Some(max) = overrides.max_connections {
            self.database.max_connections = max;
        }
        if let Some(level) = &overrides.log_level {
            self.log.level = level.clone();
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! # JEC Configuration
//!
//! Loads the strongly-typed application settings and wires up logging.
//!
//! Sources, lowest to highest precedence:
//! 1. built-in defaults,
//! 2. an optional `jec.toml` with `[database]` and `[log]` tables,
//! 3. a `.env` file in the working directory (loaded with `dotenvy`),
//! 4. the process environment (`DB_*` and `LOG_*` variables).

use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use logging::{LoggingGuards, init_logging};
pub use settings::{AppConfig, DatabaseSettings, LogSettings, Password, SettingsOverrides};

/// Environment variables and the configuration keys they override.
///
/// Later entries win, so the legacy `DB_USUARIO`/`DB_SENHA`/`DB_NOME` names are
/// listed first and only apply when the English name is unset.
const ENV_KEYS: &[(&str, &str)] = &[
    ("DB_USUARIO", "database.user"),
    ("DB_SENHA", "database.password"),
    ("DB_NOME", "database.name"),
    ("DB_HOST", "database.host"),
    ("DB_PORT", "database.port"),
    ("DB_USER", "database.user"),
    ("DB_PASSWORD", "database.password"),
    ("DB_NAME", "database.name"),
    ("DB_SCHEMA", "database.schema"),
    ("DB_MIN_CONNECTIONS", "database.min_connections"),
    ("DB_MAX_CONNECTIONS", "database.max_connections"),
    ("DB_ACQUIRE_ATTEMPTS", "database.acquire_attempts"),
    ("DB_RETRY_BACKOFF_MS", "database.retry_backoff_ms"),
    ("LOG_DIR", "log.dir"),
    ("LOG_LEVEL", "log.level"),
    ("LOG_CONSOLE", "log.console"),
];

pub const DEFAULT_CONFIG_FILE: &str = "jec.toml";

/// Loads and validates the application configuration.
///
/// This function is the primary entry point for this crate. It reads the `.env`
/// file (if any), the optional TOML file, and the process environment, then
/// applies the command-line overrides on top.
pub fn load_config(overrides: &SettingsOverrides) -> Result<AppConfig, ConfigError> {
    // A missing .env is normal in production; the real environment still applies.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(ConfigError::ValidationError(format!("Invalid .env file: {e}")));
        }
    }

    let file = overrides
        .config
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let mut config = load_config_from(Some(file), |var| std::env::var(var).ok())?;
    config.apply_overrides(overrides);
    config.database.validate()?;
    Ok(config)
}

/// Builds the configuration from an optional file and an environment lookup.
///
/// Does not validate; callers decide when to fail.
pub fn load_config_from<F>(file: Option<&Path>, env: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder()
        .set_default("database.port", 5432)?
        .set_default("database.schema", "jec")?
        .set_default("database.min_connections", 1)?
        .set_default("database.max_connections", 5)?
        .set_default("database.acquire_attempts", 3)?
        .set_default("database.retry_backoff_ms", 0)?
        .set_default("log.dir", "logs")?
        .set_default("log.level", "warn")?
        .set_default("log.console", true)?;

    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    for (var, key) in ENV_KEYS {
        if let Some(value) = env(var) {
            builder = builder.set_override(*key, value)?;
        }
    }

    let config = builder.build()?.try_deserialize::<AppConfig>()?;
    Ok(config)
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Missing required database setting '{0}' (set {1})")]
    MissingField(&'static str, &'static str),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

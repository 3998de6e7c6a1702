//! Logging setup for the JEC binary.
//!
//! Installs one `tracing-subscriber` registry with:
//! - an optional compact console layer on stderr, filtered by `RUST_LOG` or
//!   the configured level,
//! - one daily-rotated file per audit category (`connections.log`,
//!   `business.log`, `interface.log`), selected by the category's target.

use crate::error::ConfigError;
use crate::settings::LogSettings;
use events::EventCategory;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keeps the non-blocking file writers alive. Dropping it flushes pending lines.
#[must_use = "dropping the guards stops the file writers"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Initializes the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<LoggingGuards, ConfigError> {
    std::fs::create_dir_all(&settings.dir).map_err(|e| {
        ConfigError::Logging(format!("cannot create {}: {e}", settings.dir.display()))
    })?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guards = Vec::with_capacity(EventCategory::ALL.len());

    for category in EventCategory::ALL {
        let appender =
            tracing_appender::rolling::daily(&settings.dir, format!("{}.log", category.sink_name()));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);

        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
            .with_filter(Targets::new().with_target(category.target(), LevelFilter::DEBUG));
        layers.push(layer.boxed());
    }

    if settings.console {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&settings.level).map_err(|e| {
                ConfigError::Logging(format!("invalid log level '{}': {e}", settings.level))
            })?,
        };
        let layer = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter);
        layers.push(layer.boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::debug!(dir = %settings.dir.display(), "Logging initialized");
    Ok(LoggingGuards { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unparsable_level() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            dir: dir.path().join("logs"),
            level: "jec=[".to_string(),
            console: true,
        };
        // RUST_LOG would take precedence over the configured level.
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(init_logging(&settings), Err(ConfigError::Logging(_))));
        }
        assert!(settings.dir.is_dir());
    }
}

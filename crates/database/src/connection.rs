use crate::error::{DbError, DriverError};
use crate::manager::DatabaseManager;
use crate::pool::PoolSettings;
use crate::postgres::PgDriver;
use configuration::DatabaseSettings;
use events::AuditLogger;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor};
use std::sync::Arc;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

impl DatabaseManager<PgDriver> {
    /// Builds the PostgreSQL manager and opens its initial sessions.
    pub async fn connect(
        settings: &DatabaseSettings,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self, DbError> {
        settings.validate()?;
        let manager = DatabaseManager::new(PgDriver::new(settings), PoolSettings::from(settings), audit);
        manager.initialize().await?;
        Ok(manager)
    }
}

/// Establishes the pooled PostgreSQL manager for the whole application.
pub async fn connect(
    settings: &DatabaseSettings,
    audit: Arc<dyn AuditLogger>,
) -> Result<DatabaseManager<PgDriver>, DbError> {
    DatabaseManager::connect(settings, audit).await
}

/// Creates the configured schema if needed and applies the embedded migrations.
///
/// Runs on a dedicated connection outside the pool, so it works before the
/// application schema exists.
pub async fn run_migrations(settings: &DatabaseSettings) -> Result<(), DbError> {
    settings.validate()?;
    let options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(settings.password.expose())
        .database(&settings.name)
        .application_name("jec-migrate");
    let mut conn = options.connect().await.map_err(DriverError::from)?;

    let schema = format!("\"{}\"", settings.schema.replace('"', "\"\""));
    conn.execute(format!("CREATE SCHEMA IF NOT EXISTS {schema}").as_str())
        .await
        .map_err(DriverError::from)?;
    conn.execute(format!("SET search_path TO {schema}").as_str())
        .await
        .map_err(DriverError::from)?;

    MIGRATOR.run(&mut conn).await?;
    conn.close().await.map_err(DriverError::from)?;
    Ok(())
}

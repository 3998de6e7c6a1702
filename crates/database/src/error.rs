use thiserror::Error;

/// A failure reported by the driver for one physical session.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Expected to succeed on retry (refused connection, dropped socket, ...).
    #[error("Transient connection failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DriverError {
    /// Whether acquisition may retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::Transient(_) => true,
            DriverError::Fatal(_) => false,
            DriverError::Sqlx(e) => is_transient_sqlx(e),
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        // Class 08 is "connection exception"; the rest are server-side capacity
        // and shutdown states that clear on their own.
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            code.starts_with("08") || matches!(code.as_ref(), "53300" | "57P01" | "57P02" | "57P03")
        }),
        _ => false,
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection pool initialization failed: {0}")]
    PoolInitialization(String),

    #[error("Failed to acquire a connection after {attempts} attempt(s): {source}")]
    ConnectionAcquisition {
        attempts: u32,
        #[source]
        source: DriverError,
    },

    #[error("Connection pool exhausted after {attempts} attempt(s): all {max_size} connections are in use")]
    PoolExhausted { attempts: u32, max_size: u32 },

    #[error("Statement execution failed: {0}")]
    StatementExecution(#[source] DriverError),

    #[error("The connection pool is not initialized")]
    PoolNotInitialized,

    #[error("Failed to close {failed} connection(s) during shutdown: {first}")]
    PoolShutdown {
        failed: usize,
        #[source]
        first: DriverError,
    },

    #[error("Failed to connect to the database: {0}")]
    ConnectionError(#[from] DriverError),

    #[error("Invalid database configuration: {0}")]
    Config(#[from] configuration::error::ConfigError),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to decode a result row: {0}")]
    Decode(#[from] core_types::CoreError),
}

impl DbError {
    /// True for every way of failing to obtain a connection.
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            DbError::ConnectionAcquisition { .. } | DbError::PoolExhausted { .. } | DbError::PoolNotInitialized
        )
    }
}

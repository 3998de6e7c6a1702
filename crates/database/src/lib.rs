//! # JEC Database Crate
//!
//! The data access layer of the case-management system. Every statement the
//! application runs goes through here.
//!
//! ## Architectural Principles
//!
//! - **One connection per operation:** each request checks out a session from
//!   a bounded pool, pins it to the application schema, runs inside its own
//!   transaction, and is given back (or discarded) afterwards.
//! - **Bounded retries:** acquisition retries transient failures a fixed number
//!   of times and then fails with a typed error. Nothing blocks forever.
//! - **Observable:** every pool and statement event is reported through the
//!   `events::AuditLogger` seam, and `MetricsRecorder` keeps process-wide counters.
//! - **Driver seam:** the pool talks to `Driver`/`Session` traits. `PgDriver` is
//!   the `sqlx` implementation; `test_utils::MockDriver` is the scripted one,
//!   compiled only for tests and behind the `test-utils` feature.
//!
//! ## Public API
//!
//! - `connect`: builds and initializes the PostgreSQL `DatabaseManager`.
//! - `run_migrations`: creates the schema and applies the embedded migrations.
//! - `DatabaseManager`: `execute_query`, `get_metrics`, `close_all_connections`.
//! - `QueryExecutor`: the narrow trait consumers such as `CaseRepository` depend on.
//! - `DbError`: the error taxonomy of this crate.

pub mod connection;
pub mod driver;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod postgres;
pub mod repository;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use connection::{connect, run_migrations};
pub use driver::{Driver, RowSet, Session};
pub use error::{DbError, DriverError};
pub use manager::{DatabaseManager, QueryExecutor};
pub use metrics::{Metrics, MetricsRecorder};
pub use pool::{ConnectionHandle, ConnectionPool, PoolSettings, PoolStats};
pub use postgres::{PgDriver, PgSession};
pub use repository::{CaseRepository, CaseSummary};

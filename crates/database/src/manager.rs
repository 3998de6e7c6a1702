use crate::driver::{Driver, RowSet};
use crate::error::{DbError, DriverError};
use crate::metrics::{Metrics, MetricsRecorder};
use crate::pool::{ConnectionHandle, ConnectionPool, PoolSettings, PoolStats};
use async_trait::async_trait;
use core_types::{QueryRequest, QueryResult, SqlValue};
use events::{AuditLogger, LogLevel};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tokio::time::Instant;

/// Longest statement prefix written into `QUERY_EXECUTED` metadata.
const LOGGED_STATEMENT_CHARS: usize = 200;
/// Longest statement prefix in the `QUERY_START` message.
const ANNOUNCED_STATEMENT_CHARS: usize = 50;

/// The one surface callers need to run statements.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResult, DbError>;
}

/// Composes the pool, the metrics recorder and the audit logger.
///
/// Every statement runs on its own checked-out connection inside its own
/// transaction. Reads are never committed; writes are committed before the
/// connection goes back to the pool.
pub struct DatabaseManager<D: Driver> {
    pool: ConnectionPool<D>,
    metrics: Arc<MetricsRecorder>,
    audit: Arc<dyn AuditLogger>,
}

impl<D: Driver> DatabaseManager<D> {
    pub fn new(driver: D, settings: PoolSettings, audit: Arc<dyn AuditLogger>) -> Self {
        let metrics = Arc::new(MetricsRecorder::new());
        let pool = ConnectionPool::new(driver, settings, Arc::clone(&audit), Arc::clone(&metrics));
        Self { pool, metrics, audit }
    }

    pub async fn initialize(&self) -> Result<bool, DbError> {
        self.pool.initialize().await
    }

    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.pool
    }

    /// Runs one request end to end: acquire, run, commit or roll back, release.
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryResult, DbError> {
        self.metrics.record_attempt();
        self.audit.log_connection_event(
            "QUERY_START",
            &format!("Executing: {}", truncate_statement(&request.statement, ANNOUNCED_STATEMENT_CHARS)),
            LogLevel::Debug,
            None,
        );

        // Durations cover acquisition and schema pinning as well as the statement.
        let started = Instant::now();
        let mut handle = self.pool.acquire().await?;
        let result = self.run_statement(&mut handle, &request, started).await;

        let result = match result {
            Ok(result) => Ok(result),
            Err(e) => {
                self.metrics.record_failure();
                self.audit.log_connection_event(
                    "QUERY_FAILED",
                    &format!("Query failed: {e}"),
                    LogLevel::Error,
                    Some(json!({ "query": truncate_statement(&request.statement, LOGGED_STATEMENT_CHARS) })),
                );
                if let Err(rollback_err) = handle.rollback().await {
                    self.audit.log_connection_event(
                        "ROLLBACK_FAILED",
                        &format!("Rollback failed: {rollback_err}"),
                        LogLevel::Error,
                        None,
                    );
                    handle.mark_broken();
                }
                Err(DbError::StatementExecution(e))
            }
        };

        self.pool.release(handle).await;
        result
    }

    async fn run_statement(
        &self,
        handle: &mut ConnectionHandle<D::Session>,
        request: &QueryRequest,
        started: Instant,
    ) -> Result<QueryResult, DriverError> {
        handle.begin().await?;
        let result = if request.expects_rows {
            let rows = handle.fetch(&request.statement, request.params()).await?;
            QueryResult::Rows(rows.map(RowSet::into_rows).unwrap_or_default())
        } else {
            QueryResult::RowCount(handle.execute(&request.statement, request.params()).await?)
        };

        let elapsed = started.elapsed();
        self.metrics.record_success(elapsed);
        let seconds = elapsed.as_secs_f64();
        self.audit.log_connection_event(
            "QUERY_EXECUTED",
            &format!("Query completed in {seconds:.2}s"),
            LogLevel::Info,
            Some(json!({
                "query": truncate_statement(&request.statement, LOGGED_STATEMENT_CHARS),
                "params": render_params(request.params.as_deref()),
                "duration": seconds,
            })),
        );

        match &result {
            // Reads stay uncommitted; release rolls the transaction back.
            QueryResult::Rows(rows) => self.audit.log_connection_event(
                "QUERY_SUCCESS",
                &format!("Returned {} rows", rows.len()),
                LogLevel::Debug,
                None,
            ),
            QueryResult::RowCount(count) => {
                handle.commit().await?;
                self.audit.log_connection_event(
                    "UPDATE_SUCCESS",
                    &format!("Rows affected: {count}"),
                    LogLevel::Info,
                    None,
                );
            }
        }
        Ok(result)
    }

    /// Convenience form of [`DatabaseManager::execute`].
    pub async fn execute_query(
        &self,
        text: &str,
        params: Option<Vec<SqlValue>>,
        return_results: bool,
    ) -> Result<QueryResult, DbError> {
        let mut request = if return_results {
            QueryRequest::read(text)
        } else {
            QueryRequest::write(text)
        };
        request.params = params;
        self.execute(request).await
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics.snapshot(self.pool.stats())
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.pool.stats()
    }

    /// Shuts the pool down and logs the final counters.
    ///
    /// Returns `Ok(None)` when the pool was not running.
    pub async fn close_all_connections(&self) -> Result<Option<usize>, DbError> {
        let metrics = self.metrics.snapshot(None);
        match self.pool.shutdown().await {
            Ok(Some(closed)) => {
                self.audit.log_connection_event(
                    "POOL_CLOSED",
                    "Connection pool closed",
                    LogLevel::Info,
                    Some(json!({
                        "total_queries": metrics.total_queries,
                        "failed_queries": metrics.failed_queries,
                        "closed": closed,
                    })),
                );
                Ok(Some(closed))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.audit.log_connection_event(
                    "POOL_CLOSE_FAILED",
                    &format!("Error closing connection pool: {e}"),
                    LogLevel::Error,
                    None,
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<D: Driver> QueryExecutor for DatabaseManager<D> {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResult, DbError> {
        DatabaseManager::execute(self, request).await
    }
}

fn truncate_statement(statement: &str, limit: usize) -> String {
    match statement.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => statement.to_string(),
    }
}

fn render_params(params: Option<&[SqlValue]>) -> JsonValue {
    match params {
        Some(values) => JsonValue::String(format!(
            "[{}]",
            values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        )),
        None => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_statements_are_logged_whole() {
        assert_eq!(truncate_statement("SELECT 1", LOGGED_STATEMENT_CHARS), "SELECT 1");
        let exact = "x".repeat(200);
        assert_eq!(truncate_statement(&exact, LOGGED_STATEMENT_CHARS), exact);
    }

    #[test]
    fn long_statements_are_cut_at_200_chars() {
        let long = "é".repeat(250);
        let logged = truncate_statement(&long, LOGGED_STATEMENT_CHARS);
        assert!(logged.ends_with("..."));
        assert_eq!(logged.chars().count(), 203);
    }

    #[test]
    fn announced_prefix_is_shorter() {
        let statement = format!("SELECT * FROM cases WHERE title ILIKE $1 {}", "AND 1 = 1 ".repeat(10));
        let announced = truncate_statement(&statement, ANNOUNCED_STATEMENT_CHARS);
        assert_eq!(announced, format!("{}...", &statement[..50]));
    }

    #[test]
    fn params_render_as_text_or_null() {
        assert_eq!(render_params(None), JsonValue::Null);
        let rendered = render_params(Some(&[SqlValue::Int(1), SqlValue::from("a")]));
        assert!(rendered.is_string());
    }
}

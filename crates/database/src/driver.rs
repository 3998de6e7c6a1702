//! The seam between the pool and a concrete database client.
//!
//! The pool only needs to open sessions and run a handful of statement shapes
//! on them. `PgDriver` implements this over `sqlx`; tests use the scripted
//! in-memory driver from `test_utils`.

use crate::error::DriverError;
use async_trait::async_trait;
use core_types::{Row, SqlValue};

/// The raw result of a row-returning statement: column names once, then one
/// value vector per row, both in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// Pairs every row with the column names.
    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| Row::from_columns(columns.iter().cloned(), values))
            .collect()
    }
}

/// Opens physical sessions against one database target.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Session: Session;

    async fn open(&self) -> Result<Self::Session, DriverError>;

    /// A loggable description of where sessions connect to. Never includes secrets.
    fn target(&self) -> String;
}

/// One live connection. Owned by exactly one holder at a time.
#[async_trait]
pub trait Session: Send + Sized + 'static {
    /// Runs a parameterless command such as `BEGIN` or `SET search_path`.
    async fn batch(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Runs a statement and returns the affected-row count.
    async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64, DriverError>;

    /// Runs a statement and materializes its rows.
    ///
    /// Returns `None` when the statement describes no result columns at all
    /// (an `UPDATE` without `RETURNING`, a `SET`, ...).
    async fn fetch(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<Option<RowSet>, DriverError>;

    /// Closes the connection gracefully.
    async fn close(self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_rows_preserves_row_and_column_order() {
        let set = RowSet::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![SqlValue::Int(1), SqlValue::from("a")],
                vec![SqlValue::Int(2), SqlValue::from("b")],
            ],
        );
        let rows = set.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(rows[1].get("name"), Some(&SqlValue::from("b")));
        assert_eq!(rows[1].columns().collect::<Vec<_>>(), vec!["id", "name"]);
    }
}

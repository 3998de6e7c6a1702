use crate::row::Row;
use crate::value::SqlValue;

/// A single statement submitted to the executor.
///
/// `params: None` means "no bound parameters", which is the common case for
/// statements without placeholders. Placeholders use the positional `$1` form.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub statement: String,
    pub params: Option<Vec<SqlValue>>,
    /// `true` for reads that materialize rows, `false` for writes that are
    /// committed and report an affected-row count.
    pub expects_rows: bool,
}

impl QueryRequest {
    /// A row-returning request.
    pub fn read(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: None,
            expects_rows: true,
        }
    }

    /// A write request whose result is the affected-row count.
    pub fn write(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: None,
            expects_rows: false,
        }
    }

    pub fn with_params<I, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// The bound parameters as a slice; empty when there are none.
    pub fn params(&self) -> &[SqlValue] {
        self.params.as_deref().unwrap_or(&[])
    }
}

/// The outcome of a successful `execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// One mapping per row, in result order. Empty for an empty result set or
    /// a statement that describes no columns.
    Rows(Vec<Row>),
    /// The affected-row count reported by the driver for a write.
    RowCount(u64),
}

impl QueryResult {
    /// Returns the rows of a read; a write yields an empty vector.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryResult::Rows(rows) => rows,
            QueryResult::RowCount(_) => Vec::new(),
        }
    }

    /// Returns the affected-row count of a write.
    pub fn row_count(&self) -> Option<u64> {
        match self {
            QueryResult::RowCount(count) => Some(*count),
            QueryResult::Rows(_) => None,
        }
    }
}

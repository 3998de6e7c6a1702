use crate::error::DbError;
use crate::manager::QueryExecutor;
use chrono::NaiveDate;
use core_types::{QueryRequest, Row};
use events::{AuditLogger, LogLevel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const ACTIVE_CASES_SQL: &str = r#"
    SELECT id, case_number, title, category, status, filed_on
    FROM active_cases
    ORDER BY filed_on DESC, case_number ASC
"#;

const SEARCH_CASES_SQL: &str = r#"
    SELECT DISTINCT c.id, c.case_number, c.title, c.category, c.status, c.filed_on
    FROM cases AS c
    LEFT JOIN case_parties AS cp ON cp.case_id = c.id
    LEFT JOIN parties AS p ON p.id = cp.party_id
    WHERE c.case_number ILIKE $1
       OR c.title ILIKE $1
       OR p.full_name ILIKE $1
    ORDER BY c.filed_on DESC, c.case_number ASC
"#;

/// One line of a case listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: i64,
    pub case_number: String,
    pub title: String,
    pub category: String,
    pub status: String,
    pub filed_on: NaiveDate,
}

/// Case lookups used by the terminal front end.
#[derive(Clone)]
pub struct CaseRepository {
    executor: Arc<dyn QueryExecutor>,
    audit: Arc<dyn AuditLogger>,
}

impl CaseRepository {
    pub fn new(executor: Arc<dyn QueryExecutor>, audit: Arc<dyn AuditLogger>) -> Self {
        Self { executor, audit }
    }

    /// Every case that is not closed, newest filing first.
    pub async fn list_active_cases(&self) -> Result<Vec<CaseSummary>, DbError> {
        let rows = self
            .executor
            .execute(QueryRequest::read(ACTIVE_CASES_SQL))
            .await?
            .into_rows();
        let cases = decode_cases(&rows)?;
        self.audit.log_business_event(
            "cases",
            "list_active",
            Some(json!({ "count": cases.len() })),
            LogLevel::Info,
        );
        Ok(cases)
    }

    /// Case-insensitive substring search over case number, title and party names.
    pub async fn search_cases(&self, term: &str) -> Result<Vec<CaseSummary>, DbError> {
        let request = QueryRequest::read(SEARCH_CASES_SQL).with_params([like_pattern(term.trim())]);
        let rows = self.executor.execute(request).await?.into_rows();
        let cases = decode_cases(&rows)?;
        self.audit.log_business_event(
            "cases",
            "search",
            Some(json!({ "term": term, "count": cases.len() })),
            LogLevel::Info,
        );
        Ok(cases)
    }
}

fn decode_cases(rows: &[Row]) -> Result<Vec<CaseSummary>, DbError> {
    rows.iter()
        .map(|row| row.decode::<CaseSummary>().map_err(DbError::from))
        .collect()
}

/// Wraps `term` in `%` after escaping the LIKE metacharacters.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

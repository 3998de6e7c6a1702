use core_types::{QueryRequest, QueryResult, SqlValue};
use database::test_utils::{Call, MockDriver, OpenFailure, Outcome};
use database::{DatabaseManager, DbError, PoolSettings, QueryExecutor, RowSet};
use events::RecordingAuditLogger;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn manager(settings: PoolSettings) -> (DatabaseManager<MockDriver>, MockDriver, Arc<RecordingAuditLogger>) {
    let driver = MockDriver::new();
    let audit = Arc::new(RecordingAuditLogger::new());
    let manager = DatabaseManager::new(driver.clone(), settings, audit.clone());
    manager.initialize().await.unwrap();
    (manager, driver, audit)
}

/// Statements issued after the schema pin of the first acquisition.
fn after_pin(driver: &MockDriver) -> Vec<String> {
    driver.statements().into_iter().skip(3).collect()
}

#[tokio::test]
async fn read_returns_one_mapping_per_row_in_order() {
    let (db, driver, audit) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::Rows(RowSet::new(
        vec!["id".into(), "name".into()],
        vec![
            vec![SqlValue::Int(1), SqlValue::from("a")],
            vec![SqlValue::Int(2), SqlValue::from("b")],
        ],
    )));

    let rows = db
        .execute_query("SELECT id, name FROM parties", None, true)
        .await
        .unwrap()
        .into_rows();

    assert_eq!(
        serde_json::to_value(&rows).unwrap(),
        json!([{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }])
    );
    assert_eq!(rows[0].columns().collect::<Vec<_>>(), vec!["id", "name"]);
    // Reads are not committed; the release resets the transaction.
    assert_eq!(after_pin(&driver), vec!["BEGIN", "SELECT id, name FROM parties", "ROLLBACK"]);
    assert_eq!(audit.count("QUERY_SUCCESS"), 1);
    assert_eq!(audit.count("UPDATE_SUCCESS"), 0);
}

#[tokio::test]
async fn write_commits_and_returns_the_row_count() {
    let (db, driver, audit) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::RowCount(3));

    let result = db
        .execute_query(
            "UPDATE cases SET status = $1 WHERE category = $2",
            Some(vec![SqlValue::from("closed"), SqlValue::from("civil")]),
            false,
        )
        .await
        .unwrap();

    assert_eq!(result, QueryResult::RowCount(3));
    assert_eq!(
        after_pin(&driver),
        vec!["BEGIN", "UPDATE cases SET status = $1 WHERE category = $2", "COMMIT"]
    );
    let forwarded = driver.journal().into_iter().find_map(|call| match call {
        Call::Execute { params, .. } => Some(params),
        _ => None,
    });
    assert_eq!(forwarded, Some(vec![SqlValue::from("closed"), SqlValue::from("civil")]));
    assert_eq!(audit.count("UPDATE_SUCCESS"), 1);
}

#[tokio::test]
async fn failed_statement_is_rolled_back_before_release() {
    let (db, driver, audit) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::Fail("duplicate key value".into()));

    let err = db
        .execute_query("INSERT INTO parties (full_name) VALUES ($1)", Some(vec!["Doe".into()]), false)
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::StatementExecution(_)));
    assert_eq!(
        after_pin(&driver),
        vec!["BEGIN", "INSERT INTO parties (full_name) VALUES ($1)", "ROLLBACK"]
    );
    let stats = db.stats().unwrap();
    assert_eq!((stats.acquired_total, stats.released_total, stats.in_use), (1, 1, 0));
    assert_eq!(audit.count("QUERY_FAILED"), 1);
    assert_eq!(audit.count("QUERY_EXECUTED"), 0);

    let metrics = db.get_metrics();
    assert_eq!(metrics.total_queries, 1);
    assert_eq!(metrics.failed_queries, 1);
    assert!(metrics.query_times.is_empty());
}

#[tokio::test]
async fn failed_rollback_discards_the_connection() {
    let (db, driver, audit) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::Fail("server closed the connection".into()));
    driver.fail_next_batch("ROLLBACK");

    let err = db.execute_query("DELETE FROM cases", None, false).await.unwrap_err();

    assert!(matches!(err, DbError::StatementExecution(_)));
    assert_eq!(audit.count("ROLLBACK_FAILED"), 1);
    assert_eq!(driver.closed(), 1);
    let stats = db.stats().unwrap();
    assert_eq!((stats.in_use, stats.idle, stats.released_total), (0, 0, 1));

    db.execute_query("SELECT 1", None, true).await.unwrap();
    assert_eq!(driver.opened(), 2);
}

#[tokio::test]
async fn counters_move_once_per_call() {
    let (db, driver, _) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::RowCount(1));
    driver.push_outcome(Outcome::Fail("boom".into()));
    driver.push_outcome(Outcome::RowCount(1));

    let mut seen = Vec::new();
    for _ in 0..3 {
        let _ = db.execute_query("UPDATE cases SET title = title", None, false).await;
        let m = db.get_metrics();
        seen.push((m.total_queries, m.failed_queries));
    }

    assert_eq!(seen, vec![(1, 0), (2, 1), (3, 1)]);
    let metrics = db.get_metrics();
    assert_eq!(metrics.query_times.len(), 2);
    assert!(metrics.last_success.is_some());
    assert!(metrics.average_query_time().is_some());
}

#[tokio::test]
async fn acquisition_failure_counts_a_connection_issue_not_a_failed_query() {
    let (db, driver, audit) = manager(PoolSettings::new(0, 5, "jec")).await;
    driver.fail_opens(3, OpenFailure::Transient);

    let err = db.execute_query("SELECT 1", None, true).await.unwrap_err();

    assert!(matches!(err, DbError::ConnectionAcquisition { attempts: 3, .. }));
    let metrics = db.get_metrics();
    assert_eq!(metrics.total_queries, 1);
    assert_eq!(metrics.failed_queries, 0);
    assert_eq!(metrics.connection_issues, 1);
    assert!(metrics.query_times.is_empty());
    let stats = db.stats().unwrap();
    assert_eq!((stats.acquired_total, stats.released_total), (0, 0));
    assert_eq!(audit.count("QUERY_START"), 1);
    assert_eq!(audit.count("QUERY_FAILED"), 0);
}

#[tokio::test]
async fn read_without_a_result_set_returns_no_rows() {
    let (db, driver, _) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::NoResultSet);

    let result = db.execute_query("SET LOCAL statement_timeout = 0", None, true).await.unwrap();

    assert_eq!(result, QueryResult::Rows(Vec::new()));
    assert_eq!(db.get_metrics().failed_queries, 0);
}

#[tokio::test]
async fn empty_result_set_is_not_an_error() {
    let (db, _, _) = manager(PoolSettings::new(1, 5, "jec")).await;

    let rows = db
        .execute(QueryRequest::read("SELECT * FROM cases WHERE id = $1").with_params([42i64]))
        .await
        .unwrap()
        .into_rows();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn executed_event_carries_truncated_statement_and_duration() {
    let (db, _, audit) = manager(PoolSettings::new(1, 5, "jec")).await;
    let statement = format!("SELECT '{}'", "x".repeat(300));

    db.execute_query(&statement, None, true).await.unwrap();

    let event = audit
        .events()
        .into_iter()
        .find(|e| e.code == "QUERY_EXECUTED")
        .unwrap();
    let metadata = event.metadata.unwrap();
    let logged = metadata["query"].as_str().unwrap();
    assert_eq!(logged.chars().count(), 203);
    assert!(logged.ends_with("..."));
    assert!(metadata["params"].is_null());
    assert!(metadata["duration"].as_f64().unwrap() >= 0.0);
    assert!(event.message.starts_with("Query completed in "));
    assert!(event.message.ends_with('s'));
}

#[tokio::test]
async fn start_event_names_the_statement_prefix() {
    let (db, _, audit) = manager(PoolSettings::new(1, 5, "jec")).await;
    let statement = format!("SELECT * FROM cases WHERE case_number = $1 {}", "AND TRUE ".repeat(10));

    db.execute_query(&statement, Some(vec![SqlValue::from("0001")]), true)
        .await
        .unwrap();

    let event = audit.events().into_iter().find(|e| e.code == "QUERY_START").unwrap();
    assert_eq!(event.message, format!("Executing: {}...", &statement[..50]));
}

#[tokio::test(start_paused = true)]
async fn recorded_duration_includes_acquisition_retries() {
    let settings = PoolSettings::new(0, 5, "jec").with_retry_backoff(Duration::from_millis(100));
    let (db, driver, audit) = manager(settings).await;
    driver.fail_opens(2, OpenFailure::Transient);

    db.execute_query("SELECT 1", None, true).await.unwrap();

    let metrics = db.get_metrics();
    assert_eq!(metrics.query_times.len(), 1);
    assert!(metrics.query_times[0] >= 0.3, "recorded {}", metrics.query_times[0]);
    let event = audit.events().into_iter().find(|e| e.code == "QUERY_EXECUTED").unwrap();
    assert!(event.metadata.unwrap()["duration"].as_f64().unwrap() >= 0.3);
}

#[tokio::test]
async fn trait_object_executes_like_the_manager() {
    let (db, driver, _) = manager(PoolSettings::new(1, 5, "jec")).await;
    driver.push_outcome(Outcome::RowCount(7));
    let executor: Arc<dyn QueryExecutor> = Arc::new(db);

    let result = executor
        .execute(QueryRequest::write("DELETE FROM parties"))
        .await
        .unwrap();

    assert_eq!(result.row_count(), Some(7));
}

#[tokio::test]
async fn gauges_follow_pool_occupancy() {
    let driver = MockDriver::new();
    let db = DatabaseManager::new(driver.clone(), PoolSettings::new(1, 5, "jec"), Arc::new(RecordingAuditLogger::new()));

    let before = db.get_metrics();
    assert_eq!((before.active_connections, before.available_connections), (0, 0));

    db.initialize().await.unwrap();
    let handle = db.pool().acquire().await.unwrap();
    let during = db.get_metrics();
    assert_eq!((during.active_connections, during.available_connections), (1, 4));
    db.pool().release(handle).await;
}

#[tokio::test]
async fn close_all_connections_logs_final_counters_once() {
    let (db, driver, audit) = manager(PoolSettings::new(2, 5, "jec")).await;
    db.execute_query("SELECT 1", None, true).await.unwrap();

    assert_eq!(db.close_all_connections().await.unwrap(), Some(2));
    assert_eq!(db.close_all_connections().await.unwrap(), None);

    assert_eq!(driver.live_sessions(), 0);
    let closed = audit
        .events()
        .into_iter()
        .filter(|e| e.code == "POOL_CLOSED")
        .collect::<Vec<_>>();
    assert_eq!(closed.len(), 1);
    let metadata = closed[0].metadata.clone().unwrap();
    assert_eq!(metadata["total_queries"], json!(1));
    assert_eq!(metadata["failed_queries"], json!(0));
}

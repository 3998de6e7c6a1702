use database::test_utils::MockDriver;
use database::{DatabaseManager, DbError, PoolSettings};
use events::RecordingAuditLogger;
use std::sync::Arc;
use std::time::Duration;

async fn shared_manager(driver: &MockDriver, settings: PoolSettings) -> Arc<DatabaseManager<MockDriver>> {
    let manager = DatabaseManager::new(driver.clone(), settings, Arc::new(RecordingAuditLogger::new()));
    manager.initialize().await.unwrap();
    Arc::new(manager)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_queries_balance_acquire_and_release() {
    let driver = MockDriver::new().with_delay(Duration::from_millis(5));
    let db = shared_manager(&driver, PoolSettings::new(0, 50, "jec")).await;

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                db.execute_query(&format!("SELECT {i}"), None, true).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let metrics = db.get_metrics();
    assert_eq!(metrics.total_queries, 50);
    assert_eq!(metrics.failed_queries, 0);
    assert_eq!(metrics.query_times.len(), 50);

    let stats = db.stats().unwrap();
    assert_eq!(stats.acquired_total, 50);
    assert_eq!(stats.released_total, 50);
    assert_eq!(stats.in_use, 0);
    assert!(stats.idle <= 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn contention_never_exceeds_max_size() {
    let driver = MockDriver::new().with_delay(Duration::from_millis(50));
    let db = shared_manager(&driver, PoolSettings::new(0, 2, "jec")).await;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.execute_query("SELECT pg_sleep(0)", None, true).await })
        })
        .collect();

    let mut succeeded = 0u64;
    let mut exhausted = 0u64;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(DbError::PoolExhausted { max_size: 2, .. }) => exhausted += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded + exhausted, 10);
    assert!(succeeded >= 2);
    assert!(driver.opened() <= 2);

    let metrics = db.get_metrics();
    assert_eq!(metrics.total_queries, 10);
    assert_eq!(metrics.failed_queries, 0);
    assert_eq!(metrics.connection_issues, exhausted);

    let stats = db.stats().unwrap();
    assert_eq!(stats.acquired_total, succeeded);
    assert_eq!(stats.released_total, succeeded);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_query_gives_its_slot_back() {
    let driver = MockDriver::new().with_delay(Duration::from_millis(500));
    let db = shared_manager(&driver, PoolSettings::new(0, 1, "jec")).await;

    let task = {
        let db = Arc::clone(&db);
        tokio::spawn(async move { db.execute_query("SELECT 1", None, true).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let stats = db.stats().unwrap();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.abandoned_total, 1);
    assert_eq!(stats.released_total, 0);
    assert_eq!(driver.live_sessions(), 0);
}

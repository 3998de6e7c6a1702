use crate::pool::PoolStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// How many recent query durations are kept.
pub const DEFAULT_DURATION_HISTORY: usize = 1024;

/// Process-wide query counters, shared by every concurrent caller.
///
/// Counters are lock-free atomics. Only the success bookkeeping (timestamp
/// plus the bounded duration history) sits behind a mutex.
#[derive(Debug)]
pub struct MetricsRecorder {
    total_queries: AtomicU64,
    failed_queries: AtomicU64,
    connection_issues: AtomicU64,
    successes: Mutex<SuccessLog>,
    history: usize,
}

#[derive(Debug, Default)]
struct SuccessLog {
    last_success: Option<DateTime<Utc>>,
    durations: VecDeque<f64>,
}

/// A point-in-time copy of the counters plus the pool gauges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub connection_issues: u64,
    pub last_success: Option<DateTime<Utc>>,
    /// Recent execution times in seconds, oldest first.
    pub query_times: Vec<f64>,
    pub active_connections: u32,
    pub available_connections: u32,
}

impl Metrics {
    pub fn average_query_time(&self) -> Option<f64> {
        if self.query_times.is_empty() {
            return None;
        }
        Some(self.query_times.iter().sum::<f64>() / self.query_times.len() as f64)
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::with_history(DEFAULT_DURATION_HISTORY)
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that keeps at most `history` durations.
    pub fn with_history(history: usize) -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            connection_issues: AtomicU64::new(0),
            successes: Mutex::new(SuccessLog::default()),
            history: history.max(1),
        }
    }

    pub fn record_attempt(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_issue(&self) {
        self.connection_issues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, duration: Duration) {
        let mut log = self.successes.lock().unwrap_or_else(PoisonError::into_inner);
        if log.durations.len() == self.history {
            log.durations.pop_front();
        }
        log.durations.push_back(duration.as_secs_f64());
        log.last_success = Some(Utc::now());
    }

    /// Copies the counters. Gauges come from `stats`; without it (pool not
    /// initialized, occupancy unknown) both read 0.
    pub fn snapshot(&self, stats: Option<PoolStats>) -> Metrics {
        let (last_success, query_times) = {
            let log = self.successes.lock().unwrap_or_else(PoisonError::into_inner);
            (log.last_success, log.durations.iter().copied().collect())
        };
        let (active, available) = stats.map_or((0, 0), |s| (s.in_use, s.available()));

        Metrics {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            connection_issues: self.connection_issues.load(Ordering::Relaxed),
            last_success,
            query_times,
            active_connections: active,
            available_connections: available,
        }
    }
}

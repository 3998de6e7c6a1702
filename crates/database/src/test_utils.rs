//! A scripted in-memory driver for exercising the pool and executor without a
//! live server.
//!
//! Every session shares one journal, so a test can assert on the exact
//! sequence of `BEGIN` / statement / `COMMIT` / `ROLLBACK` calls.

use crate::driver::{Driver, RowSet, Session};
use crate::error::DriverError;
use async_trait::async_trait;
use core_types::SqlValue;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One call made against the mock, tagged with the session it ran on.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open { session: u64 },
    Batch { session: u64, sql: String },
    Execute { session: u64, sql: String, params: Vec<SqlValue> },
    Fetch { session: u64, sql: String, params: Vec<SqlValue> },
    Close { session: u64 },
}

impl Call {
    /// The SQL text for statement calls.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Call::Batch { sql, .. } | Call::Execute { sql, .. } | Call::Fetch { sql, .. } => Some(sql),
            Call::Open { .. } | Call::Close { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    Transient,
    Fatal,
}

/// What the next `execute` or `fetch` answers with.
#[derive(Debug, Clone)]
pub enum Outcome {
    RowCount(u64),
    Rows(RowSet),
    /// The statement describes no result columns.
    NoResultSet,
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    journal: Vec<Call>,
    open_failures: VecDeque<OpenFailure>,
    outcomes: VecDeque<Outcome>,
    batch_failures: Vec<String>,
    open_attempts: usize,
    next_session: u64,
    live_sessions: usize,
}

/// Cloning shares the script and the journal.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    delay: Option<Duration>,
    capacity: Option<usize>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `execute` and `fetch` take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Refuses opens, as a transient failure, while `capacity` sessions are live.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` opens fail with `kind`.
    pub fn fail_opens(&self, count: usize, kind: OpenFailure) {
        let mut state = self.lock();
        state.open_failures.extend(std::iter::repeat_n(kind, count));
    }

    pub fn push_outcome(&self, outcome: Outcome) {
        self.lock().outcomes.push_back(outcome);
    }

    /// The next batch whose SQL starts with `prefix` fails once.
    pub fn fail_next_batch(&self, prefix: &str) {
        self.lock().batch_failures.push(prefix.to_string());
    }

    pub fn journal(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    /// Batch, execute and fetch SQL in call order.
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|call| call.sql().map(str::to_string))
            .collect()
    }

    /// Every call to `open`, failed ones included.
    pub fn open_attempts(&self) -> usize {
        self.lock().open_attempts
    }

    pub fn opened(&self) -> usize {
        self.count(|call| matches!(call, Call::Open { .. }))
    }

    pub fn closed(&self) -> usize {
        self.count(|call| matches!(call, Call::Close { .. }))
    }

    /// Sessions opened and not yet closed or dropped.
    pub fn live_sessions(&self) -> usize {
        self.lock().live_sessions
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.lock().journal.iter().filter(|call| predicate(call)).count()
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Session = MockSession;

    async fn open(&self) -> Result<MockSession, DriverError> {
        let mut state = self.lock();
        state.open_attempts += 1;
        if let Some(failure) = state.open_failures.pop_front() {
            return Err(match failure {
                OpenFailure::Transient => DriverError::Transient("connection refused".to_string()),
                OpenFailure::Fatal => DriverError::Fatal("password authentication failed".to_string()),
            });
        }
        if self.capacity.is_some_and(|capacity| state.live_sessions >= capacity) {
            return Err(DriverError::Transient(
                "sorry, too many clients already".to_string(),
            ));
        }
        state.next_session += 1;
        state.live_sessions += 1;
        let id = state.next_session;
        state.journal.push(Call::Open { session: id });
        Ok(MockSession {
            id,
            state: Arc::clone(&self.state),
            delay: self.delay,
            closed: false,
        })
    }

    fn target(&self) -> String {
        "mock@localhost:5432/jec".to_string()
    }
}

#[derive(Debug)]
pub struct MockSession {
    id: u64,
    state: Arc<Mutex<MockState>>,
    delay: Option<Duration>,
    closed: bool,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_outcome(&self) -> Option<Outcome> {
        self.lock().outcomes.pop_front()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.journal.push(Call::Batch { session: self.id, sql: sql.to_string() });
        if let Some(pos) = state.batch_failures.iter().position(|prefix| sql.starts_with(prefix.as_str())) {
            state.batch_failures.remove(pos);
            return Err(DriverError::Fatal(format!("scripted failure for `{sql}`")));
        }
        Ok(())
    }

    async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64, DriverError> {
        self.lock().journal.push(Call::Execute {
            session: self.id,
            sql: statement.to_string(),
            params: params.to_vec(),
        });
        self.pause().await;
        match self.next_outcome() {
            None | Some(Outcome::NoResultSet) => Ok(0),
            Some(Outcome::RowCount(count)) => Ok(count),
            Some(Outcome::Rows(set)) => Ok(set.rows.len() as u64),
            Some(Outcome::Fail(message)) => Err(DriverError::Fatal(message)),
        }
    }

    async fn fetch(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<Option<RowSet>, DriverError> {
        self.lock().journal.push(Call::Fetch {
            session: self.id,
            sql: statement.to_string(),
            params: params.to_vec(),
        });
        self.pause().await;
        match self.next_outcome() {
            None => Ok(Some(RowSet::default())),
            Some(Outcome::Rows(set)) => Ok(Some(set)),
            Some(Outcome::NoResultSet | Outcome::RowCount(_)) => Ok(None),
            Some(Outcome::Fail(message)) => Err(DriverError::Fatal(message)),
        }
    }

    async fn close(mut self) -> Result<(), DriverError> {
        self.closed = true;
        let mut state = self.lock();
        state.journal.push(Call::Close { session: self.id });
        state.live_sessions = state.live_sessions.saturating_sub(1);
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if !self.closed {
            let mut state = self.lock();
            state.live_sessions = state.live_sessions.saturating_sub(1);
        }
    }
}

//! The bounded connection pool wrapped around a `Driver`.
//!
//! The pool keeps its own free list and occupancy counter behind one mutex.
//! Acquisition never blocks on capacity: when nothing is free and nothing can
//! be opened, the attempt fails with contention and the retry loop decides
//! what happens next.

use crate::driver::{Driver, RowSet, Session};
use crate::error::{DbError, DriverError};
use crate::metrics::MetricsRecorder;
use configuration::DatabaseSettings;
use core_types::SqlValue;
use events::{AuditLogger, LogLevel};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bounds and acquisition policy of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_size: u32,
    pub max_size: u32,
    /// Schema every checked-out session is pinned to.
    pub schema: String,
    pub acquire_attempts: u32,
    /// Base delay between attempts, doubled per retry and capped at 8x.
    /// Zero means immediate retry.
    pub retry_backoff: Duration,
}

impl PoolSettings {
    pub fn new(min_size: u32, max_size: u32, schema: impl Into<String>) -> Self {
        Self {
            min_size,
            max_size,
            schema: schema.into(),
            acquire_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }

    pub fn with_acquire_attempts(mut self, attempts: u32) -> Self {
        self.acquire_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(3);
        self.retry_backoff * factor
    }
}

impl From<&DatabaseSettings> for PoolSettings {
    fn from(settings: &DatabaseSettings) -> Self {
        PoolSettings::new(
            settings.min_connections,
            settings.max_connections,
            settings.schema.clone(),
        )
        .with_acquire_attempts(settings.acquire_attempts)
        .with_retry_backoff(Duration::from_millis(settings.retry_backoff_ms))
    }
}

/// Occupancy and lifetime counters of an initialized pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_size: u32,
    /// Handles currently checked out (including sessions being opened for a caller).
    pub in_use: u32,
    /// Open sessions waiting in the free list.
    pub idle: u32,
    pub acquired_total: u64,
    pub released_total: u64,
    /// Handles dropped without being released.
    pub abandoned_total: u64,
}

impl PoolStats {
    /// Checkouts still possible before the pool is exhausted.
    pub fn available(&self) -> u32 {
        self.max_size.saturating_sub(self.in_use)
    }
}

struct PoolState<S> {
    initialized: bool,
    free: Vec<S>,
    in_use: u32,
}

struct Shared<S> {
    state: Mutex<PoolState<S>>,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
    abandoned_total: AtomicU64,
}

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, PoolState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back_slot(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
    }
}

/// A counted slot. Gives itself back on drop unless it became a handle.
struct Reservation<S> {
    shared: Arc<Shared<S>>,
    armed: bool,
}

impl<S> Reservation<S> {
    fn into_shared(mut self) -> Arc<Shared<S>> {
        self.armed = false;
        Arc::clone(&self.shared)
    }
}

impl<S> Drop for Reservation<S> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.give_back_slot();
        }
    }
}

/// Why a single acquisition attempt failed.
#[derive(Debug)]
enum AttemptError {
    NotInitialized,
    /// Nothing free and nothing creatable.
    Contention,
    Driver(DriverError),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::NotInitialized => false,
            AttemptError::Contention => true,
            AttemptError::Driver(e) => e.is_transient(),
        }
    }

    fn into_db_error(self, attempts: u32, max_size: u32) -> DbError {
        match self {
            AttemptError::NotInitialized => DbError::PoolNotInitialized,
            AttemptError::Contention => DbError::PoolExhausted { attempts, max_size },
            AttemptError::Driver(source) => DbError::ConnectionAcquisition { attempts, source },
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::NotInitialized => f.write_str("pool is not initialized"),
            AttemptError::Contention => f.write_str("connection pool exhausted"),
            AttemptError::Driver(e) => write!(f, "{e}"),
        }
    }
}

/// States of the acquisition retry loop. A non-retryable error ends the budget early.
enum AcquireState<S: Session> {
    Attempting { attempt: u32 },
    Succeeded(ConnectionHandle<S>),
    ExhaustedRetries { attempts: u32, last: AttemptError },
}

/// A checked-out session, exclusively owned until it is given back with
/// [`ConnectionPool::release`].
///
/// Dropping a handle without releasing it (a cancelled task, a panic) still
/// frees its slot, but the session is discarded rather than reused.
pub struct ConnectionHandle<S: Session> {
    id: u64,
    session: Option<S>,
    shared: Arc<Shared<S>>,
    in_transaction: bool,
    broken: bool,
    acquired_at: Instant,
}

impl<S: Session> fmt::Debug for ConnectionHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("in_transaction", &self.in_transaction)
            .field("broken", &self.broken)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

impl<S: Session> ConnectionHandle<S> {
    fn new(id: u64, session: S, reservation: Reservation<S>) -> Self {
        Self {
            id,
            session: Some(session),
            shared: reservation.into_shared(),
            in_transaction: false,
            broken: false,
            acquired_at: Instant::now(),
        }
    }

    /// Marks the session as unusable; release will close it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn session(&mut self) -> Result<&mut S, DriverError> {
        self.session
            .as_mut()
            .ok_or_else(|| DriverError::Fatal("connection handle has no session".to_string()))
    }

    pub async fn begin(&mut self) -> Result<(), DriverError> {
        self.session()?.batch("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), DriverError> {
        self.session()?.batch("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), DriverError> {
        self.session()?.batch("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64, DriverError> {
        self.session()?.execute(statement, params).await
    }

    pub async fn fetch(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<Option<RowSet>, DriverError> {
        self.session()?.fetch(statement, params).await
    }
}

impl<S: Session> Drop for ConnectionHandle<S> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.shared.abandoned_total.fetch_add(1, Ordering::Relaxed);
            self.shared.give_back_slot();
            tracing::warn!(
                connection_id = self.id,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Connection handle dropped without release; session discarded"
            );
        }
    }
}

/// A bounded pool of sessions with retrying, schema-pinning acquisition.
pub struct ConnectionPool<D: Driver> {
    driver: D,
    settings: PoolSettings,
    shared: Arc<Shared<D::Session>>,
    init_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    audit: Arc<dyn AuditLogger>,
    metrics: Arc<MetricsRecorder>,
}

impl<D: Driver> ConnectionPool<D> {
    /// Creates an uninitialized pool. No session is opened until `initialize`.
    pub fn new(
        driver: D,
        settings: PoolSettings,
        audit: Arc<dyn AuditLogger>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            driver,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    initialized: false,
                    free: Vec::new(),
                    in_use: 0,
                }),
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
                abandoned_total: AtomicU64::new(0),
            }),
            init_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
            audit,
            metrics,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    /// Opens `min_size` sessions and marks the pool ready.
    ///
    /// Idempotent: returns `Ok(false)` without touching the driver when the pool
    /// is already initialized. Failures are not retried.
    pub async fn initialize(&self) -> Result<bool, DbError> {
        let _guard = self.init_lock.lock().await;
        if self.shared.lock().initialized {
            return Ok(false);
        }

        let (min_size, max_size) = (self.settings.min_size, self.settings.max_size);
        if max_size == 0 || min_size > max_size {
            let reason = format!("invalid pool bounds {min_size}-{max_size}");
            self.audit.log_connection_event(
                "POOL_FAIL",
                &format!("Failed to initialize pool: {reason}"),
                LogLevel::Error,
                None,
            );
            return Err(DbError::PoolInitialization(reason));
        }

        let mut opened = Vec::with_capacity(min_size as usize);
        for _ in 0..min_size {
            match self.driver.open().await {
                Ok(session) => opened.push(session),
                Err(e) => {
                    for session in opened {
                        if let Err(close_err) = session.close().await {
                            tracing::debug!(error = %close_err, "Failed to close session after pool init failure");
                        }
                    }
                    self.audit.log_connection_event(
                        "POOL_FAIL",
                        &format!("Failed to initialize pool: {e}"),
                        LogLevel::Error,
                        Some(json!({ "target": self.driver.target() })),
                    );
                    return Err(DbError::PoolInitialization(e.to_string()));
                }
            }
        }

        {
            let mut state = self.shared.lock();
            state.free = opened;
            state.initialized = true;
        }

        self.audit.log_connection_event(
            "POOL_INIT",
            &format!("Pool created: {min_size}-{max_size} connections"),
            LogLevel::Info,
            Some(json!({
                "min": min_size,
                "max": max_size,
                "target": self.driver.target(),
                "schema": self.settings.schema,
            })),
        );
        Ok(true)
    }

    /// Checks out a session pinned to the configured schema.
    ///
    /// Retries transient failures and contention up to the attempt budget.
    /// A terminal failure counts one connection issue.
    pub async fn acquire(&self) -> Result<ConnectionHandle<D::Session>, DbError> {
        let budget = self.settings.acquire_attempts.max(1);
        let mut state = AcquireState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AcquireState::Attempting { attempt } => match self.attempt().await {
                    Ok(handle) => {
                        self.audit.log_connection_event(
                            "CONN_ACQUIRED",
                            &format!(
                                "Connection acquired and schema set to '{}' (attempt {attempt})",
                                self.settings.schema
                            ),
                            LogLevel::Info,
                            None,
                        );
                        AcquireState::Succeeded(handle)
                    }
                    Err(err) if err.is_transient() && attempt < budget => {
                        self.audit.log_connection_event(
                            "CONN_RETRY",
                            &format!("Attempt {attempt} failed: {err}"),
                            LogLevel::Warn,
                            Some(json!({ "attempt": attempt, "budget": budget })),
                        );
                        let delay = self.settings.backoff_for(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        AcquireState::Attempting { attempt: attempt + 1 }
                    }
                    Err(err) => AcquireState::ExhaustedRetries { attempts: attempt, last: err },
                },
                AcquireState::Succeeded(handle) => return Ok(handle),
                AcquireState::ExhaustedRetries { attempts, last } => {
                    self.metrics.record_connection_issue();
                    self.audit.log_connection_event(
                        "CONN_FAILED",
                        &format!("All connection attempts failed: {last}"),
                        LogLevel::Error,
                        Some(json!({ "attempts": attempts, "transient": last.is_transient() })),
                    );
                    return Err(last.into_db_error(attempts, self.settings.max_size));
                }
            };
        }
    }

    async fn attempt(&self) -> Result<ConnectionHandle<D::Session>, AttemptError> {
        let (reservation, idle) = self.reserve()?;
        let mut session = match idle {
            Some(session) => session,
            None => self.driver.open().await.map_err(AttemptError::Driver)?,
        };

        if let Err(e) = pin_schema(&mut session, &self.settings.schema).await {
            // Not pinned, not trusted: close it; the reservation frees the slot.
            if let Err(close_err) = session.close().await {
                tracing::debug!(error = %close_err, "Failed to close unpinnable session");
            }
            return Err(AttemptError::Driver(e));
        }

        self.shared.acquired_total.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionHandle::new(id, session, reservation))
    }

    fn reserve(&self) -> Result<(Reservation<D::Session>, Option<D::Session>), AttemptError> {
        let mut state = self.shared.lock();
        if !state.initialized {
            return Err(AttemptError::NotInitialized);
        }
        // With the free list empty, every open session is checked out.
        let idle = state.free.pop();
        if idle.is_none() && state.in_use >= self.settings.max_size {
            return Err(AttemptError::Contention);
        }
        state.in_use += 1;
        let reservation = Reservation {
            shared: Arc::clone(&self.shared),
            armed: true,
        };
        Ok((reservation, idle))
    }

    /// Returns a handle to the free list.
    ///
    /// An open transaction is rolled back first; a session that cannot be reset,
    /// is marked broken, or comes back after shutdown is closed instead.
    pub async fn release(&self, mut handle: ConnectionHandle<D::Session>) {
        if handle.in_transaction && !handle.broken {
            if let Err(e) = handle.rollback().await {
                self.audit.log_connection_event(
                    "CONN_DISCARDED",
                    &format!("Reset before release failed, discarding connection: {e}"),
                    LogLevel::Warn,
                    Some(json!({ "connection_id": handle.id })),
                );
                handle.broken = true;
            }
        }

        let broken = handle.broken;
        let Some(session) = handle.session.take() else {
            return;
        };
        drop(handle);

        self.shared.released_total.fetch_add(1, Ordering::Relaxed);
        let to_close = {
            let mut state = self.shared.lock();
            state.in_use = state.in_use.saturating_sub(1);
            if broken || !state.initialized {
                Some(session)
            } else {
                state.free.push(session);
                None
            }
        };

        if let Some(session) = to_close {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "Failed to close discarded session");
            }
        }
    }

    /// Closes every idle session and marks the pool uninitialized. Sessions
    /// still checked out are closed when they are released.
    ///
    /// Returns the number of sessions closed, or `None` if there was nothing to
    /// shut down.
    pub async fn shutdown(&self) -> Result<Option<usize>, DbError> {
        let _guard = self.init_lock.lock().await;
        let sessions = {
            let mut state = self.shared.lock();
            if !state.initialized {
                return Ok(None);
            }
            state.initialized = false;
            std::mem::take(&mut state.free)
        };

        let closed = sessions.len();
        let mut failed = 0;
        let mut first_error = None;
        for session in sessions {
            if let Err(e) = session.close().await {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(first) => Err(DbError::PoolShutdown { failed, first }),
            None => Ok(Some(closed)),
        }
    }

    /// Occupancy of the pool, or `None` while it is not initialized.
    pub fn stats(&self) -> Option<PoolStats> {
        let state = self.shared.lock();
        if !state.initialized {
            return None;
        }
        Some(PoolStats {
            max_size: self.settings.max_size,
            in_use: state.in_use,
            idle: state.free.len() as u32,
            acquired_total: self.shared.acquired_total.load(Ordering::Relaxed),
            released_total: self.shared.released_total.load(Ordering::Relaxed),
            abandoned_total: self.shared.abandoned_total.load(Ordering::Relaxed),
        })
    }
}

async fn pin_schema<S: Session>(session: &mut S, schema: &str) -> Result<(), DriverError> {
    session.batch("BEGIN").await?;
    session
        .batch(&format!("SET search_path TO {}", quote_ident(schema)))
        .await?;
    session.batch("COMMIT").await
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

use crate::messages::{AuditEvent, EventCategory, LogLevel};
use serde_json::Value as JsonValue;
use std::sync::{Mutex, PoisonError};

/// The audit seam used by the data access layer.
///
/// Recording is fire-and-forget: implementations must not panic and must not
/// report failures back to the caller. Whatever goes wrong while persisting an
/// event stays inside the logger.
pub trait AuditLogger: Send + Sync {
    fn record(&self, event: AuditEvent);

    /// Logs a pool or statement lifecycle event.
    fn log_connection_event(
        &self,
        code: &str,
        message: &str,
        level: LogLevel,
        metadata: Option<JsonValue>,
    ) {
        self.record(AuditEvent::new(EventCategory::Connection, code, message, level).with_metadata(metadata));
    }

    /// Logs a domain action as `module.action`.
    fn log_business_event(
        &self,
        module: &str,
        action: &str,
        metadata: Option<JsonValue>,
        level: LogLevel,
    ) {
        let code = format!("{module}.{action}");
        self.record(AuditEvent::new(EventCategory::Business, code.clone(), code, level).with_metadata(metadata));
    }

    /// Logs a terminal interaction as `UI:component.event`.
    fn log_interface_event(
        &self,
        component: &str,
        event: &str,
        user_ctx: Option<JsonValue>,
        level: LogLevel,
    ) {
        let code = format!("UI:{component}.{event}");
        self.record(AuditEvent::new(EventCategory::Interface, code.clone(), code, level).with_metadata(user_ctx));
    }
}

/// Emits one `tracing` event per audit event.
///
/// Each category uses its own target (see [`EventCategory::target`]) so the
/// subscriber can route categories to separate sinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLogger;

impl TracingAuditLogger {
    pub fn new() -> Self {
        Self
    }
}

// `tracing` needs the target and level as constants at each callsite.
macro_rules! emit_at {
    ($target:literal, $event:expr, $metadata:expr) => {
        match $event.level {
            LogLevel::Debug => tracing::debug!(target: $target, code = %$event.code, metadata = %$metadata, "{}", $event.message),
            LogLevel::Info => tracing::info!(target: $target, code = %$event.code, metadata = %$metadata, "{}", $event.message),
            LogLevel::Warn => tracing::warn!(target: $target, code = %$event.code, metadata = %$metadata, "{}", $event.message),
            LogLevel::Error => tracing::error!(target: $target, code = %$event.code, metadata = %$metadata, "{}", $event.message),
        }
    };
}

impl AuditLogger for TracingAuditLogger {
    fn record(&self, event: AuditEvent) {
        let metadata = match &event.metadata {
            Some(value) => serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_string()),
            None => "null".to_string(),
        };
        match event.category {
            EventCategory::Connection => emit_at!("jec::connections", event, metadata),
            EventCategory::Business => emit_at!("jec::business", event, metadata),
            EventCategory::Interface => emit_at!("jec::interface", event, metadata),
        }
    }
}

/// Keeps every event in memory. Used by tests to assert on what was logged.
#[derive(Debug, Default)]
pub struct RecordingAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events carrying `code`.
    pub fn count(&self, code: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.code == code)
            .count()
    }
}

impl AuditLogger for RecordingAuditLogger {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

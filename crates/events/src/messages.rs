use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// The sink an event belongs to. Each category is persisted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Pool lifecycle, acquisition and statement execution.
    Connection,
    /// Domain-level actions performed on top of the data layer.
    Business,
    /// User-facing interactions in the terminal interface.
    Interface,
}

impl EventCategory {
    /// The `tracing` target events of this category are emitted under.
    pub const fn target(self) -> &'static str {
        match self {
            EventCategory::Connection => "jec::connections",
            EventCategory::Business => "jec::business",
            EventCategory::Interface => "jec::interface",
        }
    }

    /// File stem of the category's log sink.
    pub const fn sink_name(self) -> &'static str {
        match self {
            EventCategory::Connection => "connections",
            EventCategory::Business => "business",
            EventCategory::Interface => "interface",
        }
    }

    pub const ALL: [EventCategory; 3] = [
        EventCategory::Connection,
        EventCategory::Business,
        EventCategory::Interface,
    ];
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sink_name())
    }
}

/// A structured, append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// Short machine-readable code, e.g. `CONN_RETRY`.
    pub code: String,
    pub message: String,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl AuditEvent {
    pub fn new(
        category: EventCategory,
        code: impl Into<String>,
        message: impl Into<String>,
        level: LogLevel,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            code: code.into(),
            message: message.into(),
            level,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<JsonValue>) -> Self {
        self.metadata = metadata;
        self
    }
}

//! # JEC Events
//!
//! This crate defines the structured audit events emitted by the data access
//! layer and the `AuditLogger` seam through which they leave it.
//!
//! As a Layer 0 crate it has no workspace dependencies. The database crate only
//! ever sees the trait; where the events end up (category log files, the
//! console, an in-memory buffer in tests) is decided by the composition root.

// Declare the modules that make up this crate.
pub mod logger;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use logger::{AuditLogger, RecordingAuditLogger, TracingAuditLogger};
pub use messages::{AuditEvent, EventCategory, LogLevel};

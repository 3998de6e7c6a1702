//! # JEC Core Types
//!
//! The shared vocabulary of the data access layer. Every other crate speaks in
//! these types: the values bound into statements, the rows that come back, and
//! the request/result pair that flows through the query executor.
//!
//! As a Layer 0 crate it has no workspace dependencies.

pub mod error;
pub mod query;
pub mod row;
pub mod value;

// Re-export the core types to provide a clean public API.
pub use error::CoreError;
pub use query::{QueryRequest, QueryResult};
pub use row::Row;
pub use value::SqlValue;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// A single value travelling through the executor, either bound into a
/// statement as a parameter or decoded out of a result row.
///
/// Serializes to the natural JSON form of its payload, so a `Row` of these
/// renders as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(JsonValue),
}

impl SqlValue {
    /// Turns an operator-typed argument into the narrowest matching value.
    ///
    /// `null` (any case) becomes `Null`, `true`/`false` become `Bool`, integers
    /// and floats are recognised, and anything else is kept as `Text`.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return SqlValue::Null;
        }
        if let Ok(b) = trimmed.parse::<bool>() {
            return SqlValue::Bool(b);
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return SqlValue::Int(i);
        }
        // Only treat it as a float if it looks numeric; "inf" and "NaN" stay text.
        if trimmed.chars().any(|c| c.is_ascii_digit()) {
            if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() {
                    return SqlValue::Float(f);
                }
            }
        }
        SqlValue::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Numeric(d) => write!(f, "{d}"),
            SqlValue::Text(s) => write!(f, "{s}"),
            SqlValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            SqlValue::Date(d) => write!(f, "{d}"),
            SqlValue::Timestamp(t) => write!(f, "{t}"),
            SqlValue::TimestampTz(t) => write!(f, "{}", t.to_rfc3339()),
            SqlValue::Uuid(u) => write!(f, "{u}"),
            SqlValue::Json(v) => write!(f, "{v}"),
        }
    }
}

// --- Conversions from common Rust types ---

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value.into())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<Decimal> for SqlValue {
    fn from(value: Decimal) -> Self {
        SqlValue::Numeric(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::TimestampTz(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

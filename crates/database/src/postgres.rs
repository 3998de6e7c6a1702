//! The PostgreSQL driver, backed by a plain `sqlx::PgConnection` per session.

use crate::driver::{Driver, RowSet, Session};
use crate::error::DriverError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use configuration::DatabaseSettings;
use core_types::SqlValue;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Executor, PgConnection, Postgres, Row, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use uuid::Uuid;

/// Opens sessions from a fixed set of connect options.
#[derive(Debug, Clone)]
pub struct PgDriver {
    options: PgConnectOptions,
    target: String,
}

impl PgDriver {
    pub fn new(settings: &DatabaseSettings) -> Self {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(settings.password.expose())
            .database(&settings.name)
            .application_name("jec")
            .options([("search_path", settings.schema.as_str())]);
        Self {
            options,
            target: settings.connection_target(),
        }
    }
}

#[async_trait]
impl Driver for PgDriver {
    type Session = PgSession;

    async fn open(&self) -> Result<PgSession, DriverError> {
        let conn = self.options.connect().await?;
        Ok(PgSession { conn })
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    /// Describes `statement` on the server and binds `params` as the types it
    /// reports for each placeholder. Also returns the result column names.
    async fn prepare_bound<'q>(
        &mut self,
        statement: &'q str,
        params: &[SqlValue],
    ) -> Result<(Vec<String>, Query<'q, Postgres, PgArguments>), DriverError> {
        let prepared = (&mut self.conn).prepare(statement).await?;
        let columns = prepared.columns().iter().map(|c| c.name().to_string()).collect();
        let targets: Vec<PgType> = prepared
            .parameters()
            .and_then(|described| described.left())
            .map(|types| types.iter().map(|t| PgType::from_name(t.name())).collect())
            .unwrap_or_default();
        let query = bind_params(sqlx::query(statement), params, &targets)?;
        Ok((columns, query))
    }
}

#[async_trait]
impl Session for PgSession {
    async fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        (&mut self.conn).execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64, DriverError> {
        let (_, query) = self.prepare_bound(statement, params).await?;
        let result = query.execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<Option<RowSet>, DriverError> {
        let (columns, query) = self.prepare_bound(statement, params).await?;

        if columns.is_empty() {
            query.execute(&mut self.conn).await?;
            return Ok(None);
        }

        let rows = query.fetch_all(&mut self.conn).await?;
        let values = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Some(RowSet::new(columns, values)))
    }

    async fn close(self) -> Result<(), DriverError> {
        self.conn.close().await?;
        Ok(())
    }
}

/// The PostgreSQL types values are converted to and from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Other,
}

impl PgType {
    fn from_name(name: &str) -> Self {
        match name {
            "BOOL" => PgType::Bool,
            "INT2" => PgType::Int2,
            "INT4" => PgType::Int4,
            "INT8" => PgType::Int8,
            "FLOAT4" => PgType::Float4,
            "FLOAT8" => PgType::Float8,
            "NUMERIC" => PgType::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => PgType::Text,
            "BYTEA" => PgType::Bytea,
            "DATE" => PgType::Date,
            "TIMESTAMP" => PgType::Timestamp,
            "TIMESTAMPTZ" => PgType::TimestampTz,
            "UUID" => PgType::Uuid,
            "JSON" | "JSONB" => PgType::Json,
            _ => PgType::Other,
        }
    }

    /// The type a value is sent as when the server describes nothing usable.
    fn natural(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null | SqlValue::Text(_) => PgType::Text,
            SqlValue::Bool(_) => PgType::Bool,
            SqlValue::Int(_) => PgType::Int8,
            SqlValue::Float(_) => PgType::Float8,
            SqlValue::Numeric(_) => PgType::Numeric,
            SqlValue::Bytes(_) => PgType::Bytea,
            SqlValue::Date(_) => PgType::Date,
            SqlValue::Timestamp(_) => PgType::Timestamp,
            SqlValue::TimestampTz(_) => PgType::TimestampTz,
            SqlValue::Uuid(_) => PgType::Uuid,
            SqlValue::Json(_) => PgType::Json,
        }
    }
}

/// One bind parameter, already converted to the type of its placeholder.
/// `None` is a NULL of that type.
#[derive(Debug, Clone, PartialEq)]
enum PgParam {
    Bool(Option<bool>),
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Numeric(Option<Decimal>),
    Text(Option<String>),
    Bytea(Option<Vec<u8>>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Uuid(Option<Uuid>),
    Json(Option<JsonValue>),
}

impl PgParam {
    /// Converts `value` to `target`, parsing text literals where needed.
    ///
    /// A value the target cannot hold is an error rather than a silent cast.
    fn convert(value: &SqlValue, target: PgType) -> Result<Self, String> {
        let target = match target {
            PgType::Other => PgType::natural(value),
            known => known,
        };
        if value.is_null() {
            return Ok(Self::null_of(target));
        }
        let mismatch = || format!("cannot bind {value} as {target:?}");
        let param = match (target, value) {
            (PgType::Bool, SqlValue::Bool(b)) => PgParam::Bool(Some(*b)),
            (PgType::Bool, SqlValue::Text(s)) => PgParam::Bool(Some(parse_text(s, target)?)),

            (PgType::Int2, SqlValue::Int(i)) => PgParam::Int2(Some(i16::try_from(*i).map_err(|_| mismatch())?)),
            (PgType::Int4, SqlValue::Int(i)) => PgParam::Int4(Some(i32::try_from(*i).map_err(|_| mismatch())?)),
            (PgType::Int8, SqlValue::Int(i)) => PgParam::Int8(Some(*i)),
            (PgType::Int2, SqlValue::Text(s)) => PgParam::Int2(Some(parse_text(s, target)?)),
            (PgType::Int4, SqlValue::Text(s)) => PgParam::Int4(Some(parse_text(s, target)?)),
            (PgType::Int8, SqlValue::Text(s)) => PgParam::Int8(Some(parse_text(s, target)?)),

            (PgType::Float4, SqlValue::Float(f)) => PgParam::Float4(Some(*f as f32)),
            (PgType::Float4, SqlValue::Int(i)) => PgParam::Float4(Some(*i as f32)),
            (PgType::Float8, SqlValue::Float(f)) => PgParam::Float8(Some(*f)),
            (PgType::Float8, SqlValue::Int(i)) => PgParam::Float8(Some(*i as f64)),

            (PgType::Numeric, SqlValue::Numeric(d)) => PgParam::Numeric(Some(*d)),
            (PgType::Numeric, SqlValue::Int(i)) => PgParam::Numeric(Some(Decimal::from(*i))),
            (PgType::Numeric, SqlValue::Float(f)) => {
                PgParam::Numeric(Some(Decimal::try_from(*f).map_err(|_| mismatch())?))
            }
            (PgType::Numeric, SqlValue::Text(s)) => PgParam::Numeric(Some(parse_text(s, target)?)),

            (PgType::Text, SqlValue::Text(s)) => PgParam::Text(Some(s.clone())),
            (PgType::Text, SqlValue::Bytes(_)) => return Err(mismatch()),
            (PgType::Text, other) => PgParam::Text(Some(other.to_string())),

            (PgType::Bytea, SqlValue::Bytes(b)) => PgParam::Bytea(Some(b.clone())),
            (PgType::Bytea, SqlValue::Text(s)) => PgParam::Bytea(Some(s.clone().into_bytes())),

            (PgType::Date, SqlValue::Date(d)) => PgParam::Date(Some(*d)),
            (PgType::Date, SqlValue::Text(s)) => PgParam::Date(Some(parse_text(s, target)?)),

            (PgType::Timestamp, SqlValue::Timestamp(t)) => PgParam::Timestamp(Some(*t)),
            (PgType::Timestamp, SqlValue::Date(d)) => PgParam::Timestamp(Some(d.and_time(NaiveTime::MIN))),
            (PgType::Timestamp, SqlValue::Text(s)) => PgParam::Timestamp(Some(parse_timestamp(s)?)),

            (PgType::TimestampTz, SqlValue::TimestampTz(t)) => PgParam::TimestampTz(Some(*t)),
            (PgType::TimestampTz, SqlValue::Timestamp(t)) => PgParam::TimestampTz(Some(t.and_utc())),
            (PgType::TimestampTz, SqlValue::Text(s)) => PgParam::TimestampTz(Some(parse_timestamptz(s)?)),

            (PgType::Uuid, SqlValue::Uuid(u)) => PgParam::Uuid(Some(*u)),
            (PgType::Uuid, SqlValue::Text(s)) => PgParam::Uuid(Some(parse_text(s, target)?)),

            (PgType::Json, SqlValue::Json(v)) => PgParam::Json(Some(v.clone())),
            (PgType::Json, SqlValue::Text(s)) => {
                PgParam::Json(Some(serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone()))))
            }
            (PgType::Json, other) => PgParam::Json(Some(serde_json::to_value(other).map_err(|_| mismatch())?)),

            _ => return Err(mismatch()),
        };
        Ok(param)
    }

    fn null_of(target: PgType) -> Self {
        match target {
            PgType::Bool => PgParam::Bool(None),
            PgType::Int2 => PgParam::Int2(None),
            PgType::Int4 => PgParam::Int4(None),
            PgType::Int8 => PgParam::Int8(None),
            PgType::Float4 => PgParam::Float4(None),
            PgType::Float8 => PgParam::Float8(None),
            PgType::Numeric => PgParam::Numeric(None),
            PgType::Text | PgType::Other => PgParam::Text(None),
            PgType::Bytea => PgParam::Bytea(None),
            PgType::Date => PgParam::Date(None),
            PgType::Timestamp => PgParam::Timestamp(None),
            PgType::TimestampTz => PgParam::TimestampTz(None),
            PgType::Uuid => PgParam::Uuid(None),
            PgType::Json => PgParam::Json(None),
        }
    }

    fn bind_to<'q>(self, query: Query<'q, Postgres, PgArguments>) -> Query<'q, Postgres, PgArguments> {
        match self {
            PgParam::Bool(v) => query.bind(v),
            PgParam::Int2(v) => query.bind(v),
            PgParam::Int4(v) => query.bind(v),
            PgParam::Int8(v) => query.bind(v),
            PgParam::Float4(v) => query.bind(v),
            PgParam::Float8(v) => query.bind(v),
            PgParam::Numeric(v) => query.bind(v),
            PgParam::Text(v) => query.bind(v),
            PgParam::Bytea(v) => query.bind(v),
            PgParam::Date(v) => query.bind(v),
            PgParam::Timestamp(v) => query.bind(v),
            PgParam::TimestampTz(v) => query.bind(v),
            PgParam::Uuid(v) => query.bind(v),
            PgParam::Json(v) => query.bind(v),
        }
    }
}

fn parse_text<T: FromStr>(text: &str, target: PgType) -> Result<T, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("cannot bind {text:?} as {target:?}"))
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, String> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDate::from_str(text).map(|d| d.and_time(NaiveTime::MIN)))
        .map_err(|_| format!("cannot bind {text:?} as Timestamp"))
}

fn parse_timestamptz(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| parse_timestamp(text).map(|t| t.and_utc()))
        .map_err(|_| format!("cannot bind {text:?} as TimestampTz"))
}

/// Binds each value as the matching described placeholder type. Values past
/// the described placeholders keep their own type and let the server reject them.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
    targets: &[PgType],
) -> Result<Query<'q, Postgres, PgArguments>, DriverError> {
    for (index, value) in params.iter().enumerate() {
        let target = targets.get(index).copied().unwrap_or(PgType::Other);
        let param = PgParam::convert(value, target)
            .map_err(|reason| DriverError::Fatal(format!("parameter ${}: {reason}", index + 1)))?;
        query = param.bind_to(query);
    }
    Ok(query)
}

fn decode_row(row: &PgRow) -> Result<Vec<SqlValue>, DriverError> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

fn decode_value(row: &PgRow, index: usize) -> Result<SqlValue, DriverError> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = row.column(index).type_info().name();
    let value = match PgType::from_name(type_name) {
        PgType::Bool => SqlValue::Bool(row.try_get(index)?),
        PgType::Int2 => SqlValue::Int(row.try_get::<i16, _>(index)?.into()),
        PgType::Int4 => SqlValue::Int(row.try_get::<i32, _>(index)?.into()),
        PgType::Int8 => SqlValue::Int(row.try_get(index)?),
        PgType::Float4 => SqlValue::Float(row.try_get::<f32, _>(index)?.into()),
        PgType::Float8 => SqlValue::Float(row.try_get(index)?),
        PgType::Numeric => SqlValue::Numeric(row.try_get::<Decimal, _>(index)?),
        PgType::Text => SqlValue::Text(row.try_get(index)?),
        PgType::Bytea => SqlValue::Bytes(row.try_get(index)?),
        PgType::Date => SqlValue::Date(row.try_get::<NaiveDate, _>(index)?),
        PgType::Timestamp => SqlValue::Timestamp(row.try_get::<NaiveDateTime, _>(index)?),
        PgType::TimestampTz => SqlValue::TimestampTz(row.try_get::<DateTime<Utc>, _>(index)?),
        PgType::Uuid => SqlValue::Uuid(row.try_get::<Uuid, _>(index)?),
        PgType::Json => SqlValue::Json(row.try_get::<JsonValue, _>(index)?),
        PgType::Other => row
            .try_get_unchecked::<String, _>(index)
            .map(SqlValue::Text)
            .map_err(|e| DriverError::Fatal(format!("unsupported column type {type_name}: {e}")))?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn type_names_map_to_column_kinds() {
        assert_eq!(PgType::from_name("INT2"), PgType::Int2);
        assert_eq!(PgType::from_name("INT4"), PgType::Int4);
        assert_eq!(PgType::from_name("NUMERIC"), PgType::Numeric);
        assert_eq!(PgType::from_name("DATE"), PgType::Date);
        assert_eq!(PgType::from_name("TIMESTAMPTZ"), PgType::TimestampTz);
        assert_eq!(PgType::from_name("JSONB"), PgType::Json);
        assert_eq!(PgType::from_name("VARCHAR"), PgType::Text);
        assert_eq!(PgType::from_name("BPCHAR"), PgType::Text);
        // Decoded through the text fallback.
        assert_eq!(PgType::from_name("INTERVAL"), PgType::Other);
        assert_eq!(PgType::from_name("INT4[]"), PgType::Other);
    }

    #[test]
    fn integers_narrow_to_the_placeholder_width() {
        assert_eq!(PgParam::convert(&SqlValue::Int(7), PgType::Int4), Ok(PgParam::Int4(Some(7))));
        assert_eq!(PgParam::convert(&SqlValue::Int(-3), PgType::Int2), Ok(PgParam::Int2(Some(-3))));
        assert_eq!(PgParam::convert(&SqlValue::Int(7), PgType::Int8), Ok(PgParam::Int8(Some(7))));
        assert!(PgParam::convert(&SqlValue::Int(i64::from(i32::MAX) + 1), PgType::Int4).is_err());
    }

    #[test]
    fn null_takes_the_placeholder_type() {
        assert_eq!(PgParam::convert(&SqlValue::Null, PgType::Date), Ok(PgParam::Date(None)));
        assert_eq!(PgParam::convert(&SqlValue::Null, PgType::Int4), Ok(PgParam::Int4(None)));
        assert_eq!(PgParam::convert(&SqlValue::Null, PgType::Other), Ok(PgParam::Text(None)));
    }

    #[test]
    fn text_literals_are_parsed_into_the_placeholder_type() {
        assert_eq!(
            PgParam::convert(&SqlValue::from("2020-01-01"), PgType::Date),
            Ok(PgParam::Date(Some(date(2020, 1, 1))))
        );
        assert_eq!(
            PgParam::convert(&SqlValue::from("2024-03-01 09:30:00"), PgType::Timestamp),
            Ok(PgParam::Timestamp(Some(date(2024, 3, 1).and_hms_opt(9, 30, 0).unwrap())))
        );
        assert_eq!(
            PgParam::convert(&SqlValue::from("2024-03-01T09:30:00-03:00"), PgType::TimestampTz),
            Ok(PgParam::TimestampTz(Some(date(2024, 3, 1).and_hms_opt(12, 30, 0).unwrap().and_utc())))
        );
        assert_eq!(
            PgParam::convert(&SqlValue::from("10.50"), PgType::Numeric),
            Ok(PgParam::Numeric(Some(Decimal::new(1050, 2))))
        );
        assert_eq!(
            PgParam::convert(&SqlValue::from(" 42 "), PgType::Int4),
            Ok(PgParam::Int4(Some(42)))
        );
        assert_eq!(
            PgParam::convert(&SqlValue::from(r#"{"a":1}"#), PgType::Json),
            Ok(PgParam::Json(Some(json!({ "a": 1 }))))
        );
        assert!(PgParam::convert(&SqlValue::from("yesterday"), PgType::Date).is_err());
    }

    #[test]
    fn text_placeholders_accept_any_printable_value() {
        assert_eq!(
            PgParam::convert(&SqlValue::Int(12), PgType::Text),
            Ok(PgParam::Text(Some("12".to_string())))
        );
        assert_eq!(
            PgParam::convert(&SqlValue::Date(date(2020, 1, 1)), PgType::Text),
            Ok(PgParam::Text(Some("2020-01-01".to_string())))
        );
        assert!(PgParam::convert(&SqlValue::Bytes(vec![1]), PgType::Text).is_err());
    }

    #[test]
    fn numbers_widen_into_float_and_numeric() {
        assert_eq!(PgParam::convert(&SqlValue::Int(2), PgType::Float8), Ok(PgParam::Float8(Some(2.0))));
        assert_eq!(
            PgParam::convert(&SqlValue::Int(2), PgType::Numeric),
            Ok(PgParam::Numeric(Some(Decimal::from(2))))
        );
        assert!(PgParam::convert(&SqlValue::Float(1.5), PgType::Int4).is_err());
    }

    #[test]
    fn undescribed_placeholders_keep_the_value_type() {
        assert_eq!(PgParam::convert(&SqlValue::Int(7), PgType::Other), Ok(PgParam::Int8(Some(7))));
        assert_eq!(
            PgParam::convert(&SqlValue::from("x"), PgType::Other),
            Ok(PgParam::Text(Some("x".to_string())))
        );
    }

    #[test]
    fn bind_errors_name_the_parameter_position() {
        let err = bind_params(sqlx::query("SELECT $1, $2"), &[SqlValue::Int(1), SqlValue::from("soon")], &[
            PgType::Int4,
            PgType::Date,
        ])
        .err()
        .unwrap();
        assert!(err.to_string().starts_with("parameter $2: "));
        assert!(!err.is_transient());
    }
}

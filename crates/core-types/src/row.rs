use crate::error::CoreError;
use crate::value::SqlValue;
use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One materialized result row: column name to value, in result-set order.
///
/// Behaves like a mapping. If the result set repeats a column name (e.g. a
/// `SELECT a.*, b.*` join), the name keeps the position of its first
/// occurrence and the value of its last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, SqlValue)>,
}

impl Row {
    /// Builds a row by pairing column names with values positionally.
    pub fn from_columns<I, V>(columns: I, values: V) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        V: IntoIterator<Item = SqlValue>,
    {
        let mut row = Row::default();
        for (column, value) in columns.into_iter().zip(values) {
            row.insert(column.into(), value);
        }
        row
    }

    /// Inserts a value, replacing the value of an existing column in place.
    pub fn insert(&mut self, column: String, value: SqlValue) {
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Like `get`, but a missing column is an error.
    pub fn try_get(&self, column: &str) -> Result<&SqlValue, CoreError> {
        self.get(column)
            .ok_or_else(|| CoreError::MissingColumn(column.to_string()))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes the row into a typed struct whose fields match the column names.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::to_value(self)
            .and_then(serde_json::from_value)
            .map_err(|source| CoreError::Decode {
                target: std::any::type_name::<T>(),
                source,
            })
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn keeps_column_order() {
        let row = Row::from_columns(["id", "name"], [SqlValue::Int(1), SqlValue::from("a")]);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(row.get("name"), Some(&SqlValue::from("a")));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn duplicate_column_keeps_first_position_and_last_value() {
        let row = Row::from_columns(
            ["id", "title", "id"],
            [SqlValue::Int(1), SqlValue::from("t"), SqlValue::Int(9)],
        );
        assert_eq!(row.len(), 2);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "title"]);
        assert_eq!(row.get("id"), Some(&SqlValue::Int(9)));
    }

    #[test]
    fn serializes_as_ordered_object() {
        let row = Row::from_columns(["z", "a"], [SqlValue::Int(1), SqlValue::Null]);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"z":1,"a":null}"#);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Party {
        id: i64,
        name: String,
        nickname: Option<String>,
    }

    #[test]
    fn decodes_into_typed_struct() {
        let row = Row::from_columns(
            ["id", "name", "nickname"],
            [SqlValue::Int(7), SqlValue::from("Ana"), SqlValue::Null],
        );
        let party: Party = row.decode().unwrap();
        assert_eq!(
            party,
            Party { id: 7, name: "Ana".to_string(), nickname: None }
        );
    }

    #[test]
    fn decode_reports_the_target_type() {
        let row = Row::from_columns(["id"], [SqlValue::from("not a number")]);
        let err = row.decode::<Party>().unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
        assert!(row.try_get("name").is_err());
    }
}

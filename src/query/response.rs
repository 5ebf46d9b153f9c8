use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ingress::Value;
use crate::query::row::Row;

/// Column metadata as reported by `/exec`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Body of a successful `/exec` call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryResponse {
    pub query: String,
    pub columns: Vec<Column>,
    /// Index of the designated timestamp column, -1 when there is none.
    pub timestamp: i64,
    pub dataset: Vec<Vec<serde_json::Value>>,
    pub count: u64,
}

impl QueryResponse {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Typed rows, converted one at a time as the iterator is advanced.
    pub fn into_rows(self) -> Rows {
        let names: Arc<[String]> = self.columns.iter().map(|c| c.name.clone()).collect();
        let kinds = self
            .columns
            .iter()
            .map(|c| ColumnKind::from_type(&c.column_type))
            .collect();
        Rows {
            names,
            kinds,
            dataset: self.dataset.into_iter(),
        }
    }
}

/// How a QuestDB column type maps onto [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Boolean,
    Integer,
    Float,
    Timestamp,
    /// Types without a dedicated variant (UUID, IPV4, LONG256, ...) keep their JSON text.
    Raw,
}

impl ColumnKind {
    pub fn from_type(column_type: &str) -> Self {
        match column_type.to_ascii_uppercase().as_str() {
            "SYMBOL" | "VARCHAR" | "STRING" | "CHAR" => ColumnKind::Text,
            "BOOLEAN" => ColumnKind::Boolean,
            "LONG" | "INT" | "SHORT" | "BYTE" => ColumnKind::Integer,
            "DOUBLE" | "FLOAT" => ColumnKind::Float,
            "TIMESTAMP" | "DATE" => ColumnKind::Timestamp,
            _ => ColumnKind::Raw,
        }
    }

    pub fn convert(&self, raw: serde_json::Value) -> Result<Option<Value>> {
        use serde_json::Value as Json;

        let value = match (self, raw) {
            (_, Json::Null) => return Ok(None),
            (ColumnKind::Text, Json::String(s)) => Value::String(s),
            (ColumnKind::Boolean, Json::Bool(b)) => Value::Boolean(b),
            (ColumnKind::Integer, Json::Number(n)) if n.is_i64() => {
                Value::Integer(n.as_i64().unwrap_or_default())
            }
            (ColumnKind::Float, Json::Number(n)) => {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
            (ColumnKind::Timestamp, Json::String(s)) => Value::Timestamp(parse_timestamp(&s)?),
            (ColumnKind::Raw, Json::String(s)) => Value::String(s),
            (ColumnKind::Raw, other) => Value::String(other.to_string()),
            (kind, other) => {
                return Err(Error::Decode(format!(
                    "{} is not a valid {:?} value",
                    other, kind
                )))
            }
        };
        Ok(Some(value))
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("invalid timestamp {:?}: {}", s, e)))
}

/// Lazily converted rows of a [`QueryResponse`]. Not restartable.
#[derive(Debug)]
pub struct Rows {
    names: Arc<[String]>,
    kinds: Vec<ColumnKind>,
    dataset: std::vec::IntoIter<Vec<serde_json::Value>>,
}

impl Rows {
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    fn convert(&self, raw: Vec<serde_json::Value>) -> Result<Row> {
        if raw.len() != self.kinds.len() {
            return Err(Error::Decode(format!(
                "row has {} values for {} columns",
                raw.len(),
                self.kinds.len()
            )));
        }
        let values = self
            .kinds
            .iter()
            .zip(raw)
            .map(|(kind, value)| kind.convert(value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(self.names.clone(), values))
    }
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.dataset.next()?;
        Some(self.convert(raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.dataset.size_hint()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) const SAMPLE: &str = r#"{
        "query": "SELECT * FROM test_table",
        "columns": [
            {"name": "number", "type": "LONG"},
            {"name": "complex", "type": "DOUBLE"},
            {"name": "string", "type": "VARCHAR"},
            {"name": "tf", "type": "BOOLEAN"},
            {"name": "some_symbol", "type": "SYMBOL"},
            {"name": "timestamp", "type": "TIMESTAMP"}
        ],
        "timestamp": 5,
        "dataset": [
            [15, 3.14159, "hello", true, "AAPL", "2023-08-14T12:00:00.000000Z"]
        ],
        "count": 1
    }"#;

    #[test]
    fn converts_each_column_type() {
        let resp = QueryResponse::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(resp.count, 1);
        let rows: Vec<Row> = resp.into_rows().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.get("number"), Some(&Value::Integer(15)));
        assert_eq!(row.get("complex"), Some(&Value::Float(3.14159)));
        assert_eq!(row.get("string"), Some(&Value::String("hello".into())));
        assert_eq!(row.get("tf"), Some(&Value::Boolean(true)));
        assert_eq!(row.get("some_symbol"), Some(&Value::String("AAPL".into())));
        assert_eq!(
            row.get("timestamp"),
            Some(&Value::Timestamp(Utc.with_ymd_and_hms(2023, 8, 14, 12, 0, 0).unwrap()))
        );
    }

    #[test]
    fn nulls_become_missing_values() {
        let body = r#"{"columns":[{"name":"x","type":"DOUBLE"}],"dataset":[[null]],"count":1}"#;
        let row = QueryResponse::from_slice(body.as_bytes())
            .unwrap()
            .into_rows()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row.get("x"), None);
        assert!(row.contains("x"));
    }

    #[test]
    fn unknown_types_keep_their_text() {
        assert_eq!(ColumnKind::from_type("UUID"), ColumnKind::Raw);
        assert_eq!(
            ColumnKind::Raw.convert(serde_json::json!(12)).unwrap(),
            Some(Value::String("12".into()))
        );
    }

    #[test]
    fn mismatched_values_are_decode_errors() {
        let err = ColumnKind::Integer.convert(serde_json::json!("x")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        let err = ColumnKind::Timestamp.convert(serde_json::json!("yesterday")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let body = r#"{"columns":[{"name":"x","type":"LONG"}],"dataset":[[1, 2]],"count":1}"#;
        let mut rows = QueryResponse::from_slice(body.as_bytes()).unwrap().into_rows();
        assert!(matches!(rows.next(), Some(Err(Error::Decode(_)))));
        assert!(rows.next().is_none());
    }

    #[test]
    fn ddl_response_has_no_rows() {
        let resp = QueryResponse::from_slice(br#"{"ddl":"OK"}"#).unwrap();
        assert_eq!(resp.into_rows().count(), 0);
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(v: serde_json::Value) -> Result<Self> {
        match v {
            serde_json::Value::Bool(b) => Ok(Value::Boolean(b)),
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(Error::Encoding(format!("number {} does not fit a column", n)))
                }
            }
            other => Err(Error::Encoding(format!(
                "unsupported column value: {}",
                other
            ))),
        }
    }
}

/// One row destined for a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub table_name: String,
    pub symbols: BTreeMap<String, String>,
    pub columns: BTreeMap<String, Value>,
    /// Designated timestamp. `None` means "now", resolved when the row is encoded.
    pub at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            symbols: BTreeMap::new(),
            columns: BTreeMap::new(),
            at: None,
        }
    }

    pub fn symbol(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.symbols.insert(name.into(), value.into());
        self
    }

    pub fn column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    /// Build a message from a JSON object of the form
    /// `{"table_name": .., "symbols": {..}, "columns": {..}, "at": ..}`.
    ///
    /// `null` symbols and columns are skipped. `at` may be an RFC 3339 string
    /// or integer nanoseconds since the epoch.
    pub fn from_json(doc: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut obj) = doc else {
            return Err(Error::Encoding("message must be a JSON object".into()));
        };

        let table_name = match obj.remove("table_name") {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => {
                return Err(Error::Encoding(format!("table_name must be a string, got {}", other)))
            }
            None => return Err(Error::Encoding("missing table_name".into())),
        };
        let mut msg = Message::new(table_name);

        if let Some(symbols) = obj.remove("symbols") {
            for (name, value) in json_object(symbols, "symbols")? {
                match value {
                    serde_json::Value::Null => {}
                    serde_json::Value::String(s) => {
                        msg.symbols.insert(name, s);
                    }
                    other => {
                        return Err(Error::Encoding(format!(
                            "symbol {} must be a string, got {}",
                            name, other
                        )))
                    }
                }
            }
        }

        if let Some(columns) = obj.remove("columns") {
            for (name, value) in json_object(columns, "columns")? {
                if value.is_null() {
                    continue;
                }
                msg.columns.insert(name, Value::try_from(value)?);
            }
        }

        msg.at = match obj.remove("at") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| Error::Encoding(format!("invalid timestamp {:?}: {}", s, e)))?
                    .with_timezone(&Utc),
            ),
            Some(serde_json::Value::Number(n)) => {
                let nanos = n
                    .as_i64()
                    .ok_or_else(|| Error::Encoding(format!("invalid timestamp {}", n)))?;
                Some(Utc.timestamp_nanos(nanos))
            }
            Some(other) => return Err(Error::Encoding(format!("invalid timestamp {}", other))),
        };

        Ok(msg)
    }
}

fn json_object(
    value: serde_json::Value,
    what: &str,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => Err(Error::Encoding(format!("{} must be an object, got {}", what, other))),
    }
}

/// Conversion contract for caller-defined row types.
pub trait ToMessage {
    fn to_message(&self) -> Message;
}

impl ToMessage for Message {
    fn to_message(&self) -> Message {
        self.clone()
    }
}

impl<T: ToMessage + ?Sized> ToMessage for &T {
    fn to_message(&self) -> Message {
        (**self).to_message()
    }
}

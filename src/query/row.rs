use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::ingress::Value;

/// One result row: values in column order, addressable by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Option<Value>>,
}

impl Row {
    pub(crate) fn new(names: Arc<[String]>, values: Vec<Option<Value>>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    /// Value of the named column. `None` if the column is absent or SQL NULL.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).and_then(|i| self.values[i].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_ref))
    }

    pub(crate) fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// The row as a JSON object keyed by column name. Timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(name, value)| {
                let json = match value {
                    Some(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                    None => serde_json::Value::Null,
                };
                (name.to_string(), json)
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// Map the row onto `T` by column name.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_json()).map_err(|e| {
            Error::Decode(format!("cannot map row onto {}: {}", std::any::type_name::<T>(), e))
        })
    }
}

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::ingress::Value;
use crate::query::response::{Column, QueryResponse};

/// Column-major query result.
///
/// When the result has a `TIMESTAMP` column, the first one is lifted out as
/// the index and rows are ordered newest first. Rows with a NULL index sort last.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index: Option<FrameIndex>,
    columns: Vec<Column>,
    data: Vec<Vec<Option<Value>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameIndex {
    pub name: String,
    pub values: Vec<Option<DateTime<Utc>>>,
}

impl Frame {
    pub fn from_response(resp: QueryResponse) -> Result<Self> {
        let index_pos = resp
            .columns
            .iter()
            .position(|c| c.column_type.eq_ignore_ascii_case("TIMESTAMP"));
        let columns = resp.columns.clone();

        let mut rows = resp
            .into_rows()
            .map(|row| row.map(|r| r.into_values()))
            .collect::<Result<Vec<_>>>()?;

        let mut index = None;
        if let Some(pos) = index_pos {
            let mut keyed: Vec<(Option<DateTime<Utc>>, Vec<Option<Value>>)> = rows
                .into_iter()
                .map(|mut values| {
                    let key = match values.remove(pos) {
                        Some(Value::Timestamp(ts)) => Some(ts),
                        _ => None,
                    };
                    (key, values)
                })
                .collect();
            keyed.sort_by(|a, b| b.0.cmp(&a.0));

            let (keys, rest): (Vec<_>, Vec<_>) = keyed.into_iter().unzip();
            rows = rest;
            index = Some(FrameIndex {
                name: columns[pos].name.clone(),
                values: keys,
            });
        }

        let columns: Vec<Column> = columns
            .into_iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != index_pos)
            .map(|(_, c)| c)
            .collect();

        let mut data: Vec<Vec<Option<Value>>> = vec![Vec::with_capacity(rows.len()); columns.len()];
        for row in rows {
            for (col, value) in data.iter_mut().zip(row) {
                col.push(value);
            }
        }

        Ok(Self {
            index,
            columns,
            data,
        })
    }

    pub fn len(&self) -> usize {
        match (&self.index, self.data.first()) {
            (Some(index), _) => index.values.len(),
            (None, Some(col)) => col.len(),
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> Option<&FrameIndex> {
        self.index.as_ref()
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.as_ref().map(|i| i.name.as_str())
    }

    /// Non-index columns in result order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[Option<Value>]> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(&self.data[pos])
    }

    /// Value at `row` of column `name`. `None` for NULL or out of range.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name)?.get(row)?.as_ref()
    }
}

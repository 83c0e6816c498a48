//! Decoded result rows and their column metadata.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{DataRow, FieldDescription};
use crate::protocol::types::{FormatCode, Oid};
use crate::types::{FromValue, Value, preferred_format};

/// Metadata of one result column, captured when the statement is described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    pub type_modifier: i32,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Format the column is requested in at Bind.
    pub format: FormatCode,
}

impl ColumnInfo {
    /// Build from a Describe response; the requested format follows the type.
    pub(crate) fn from_described(field: &FieldDescription<'_>) -> Self {
        let type_oid = field.type_oid();
        Self {
            name: field.name.to_owned(),
            type_oid,
            type_size: field.type_size(),
            type_modifier: field.type_modifier(),
            table_oid: field.table_oid(),
            column_id: field.column_id(),
            format: preferred_format(type_oid),
        }
    }

    /// Build from a RowDescription that precedes the rows themselves, where
    /// the server reports the actual format.
    pub(crate) fn from_field(field: &FieldDescription<'_>) -> Self {
        Self {
            format: field.format(),
            ..Self::from_described(field)
        }
    }
}

/// A decoded result row.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Value>,
}

impl Row {
    /// Decode a DataRow against the column metadata.
    pub(crate) fn decode(columns: &Arc<[ColumnInfo]>, row: DataRow<'_>) -> Result<Self> {
        if row.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "DataRow has {} columns, expected {}",
                row.len(),
                columns.len()
            )));
        }
        let values = columns
            .iter()
            .zip(row.iter())
            .map(|(col, raw)| Value::decode(col.type_oid, col.format, raw?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            columns: Arc::clone(columns),
            values,
        })
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Get the raw value at `idx`.
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Convert the value at `idx` into `T`.
    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            Error::InvalidUsage(format!(
                "column index {} out of range for row of {} columns",
                idx,
                self.values.len()
            ))
        })?;
        T::from_value(value.clone())
    }

    /// Convert the value of the first column named `name` into `T`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let idx = self
            .columns
            .iter()
            .position(|col| col.name == name)
            .ok_or_else(|| Error::InvalidUsage(format!("no column named {:?}", name)))?;
        self.get(idx)
    }

    /// Move the first value out of the row.
    pub(crate) fn into_first(self) -> Value {
        self.values.into_iter().next().unwrap_or(Value::Null)
    }
}

//! Result rows.
//!
//! A row keeps the raw byte span of every column (sliced out of the packet,
//! no copy) and materializes [`MySqlValue`]s on lookup.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{MySqlError, MySqlResult};
use crate::protocol::messages::ColumnDefinition;
use crate::protocol::wire::{read_bytes, read_len_enc_bytes, read_u8};
use crate::types::{bitmap::ROW_OFFSET, Format, MySqlValue, NullBitmap};

/// One row of a result set.
#[derive(Debug, Clone)]
pub struct MySqlRow {
    columns: Arc<[ColumnDefinition]>,
    values: Vec<Option<Bytes>>,
    format: Format,
}

impl MySqlRow {
    /// Decode a text protocol row (COM_QUERY).
    pub fn decode_text(payload: &Bytes, columns: Arc<[ColumnDefinition]>) -> MySqlResult<Self> {
        let mut buf = &payload[..];
        let mut values = Vec::with_capacity(columns.len());
        for _ in 0..columns.len() {
            values.push(read_len_enc_bytes(&mut buf)?.map(|v| payload.slice_ref(v)));
        }
        Ok(Self {
            columns,
            values,
            format: Format::Text,
        })
    }

    /// Decode a binary protocol row (COM_STMT_EXECUTE).
    pub fn decode_binary(payload: &Bytes, columns: Arc<[ColumnDefinition]>) -> MySqlResult<Self> {
        let mut buf = &payload[..];
        if read_u8(&mut buf)? != 0x00 {
            return Err(MySqlError::Protocol("binary row must start with 0x00".into()));
        }
        let nulls = NullBitmap::decode(&mut buf, columns.len(), ROW_OFFSET)?;
        let mut values = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if nulls.is_null(i) {
                values.push(None);
                continue;
            }
            let raw = match column.column_type.fixed_length() {
                Some(len) => read_bytes(&mut buf, len)?,
                None => read_len_enc_bytes(&mut buf)?.ok_or_else(|| {
                    MySqlError::Protocol(format!("NULL length for non-null column {}", column.name))
                })?,
            };
            values.push(Some(payload.slice_ref(raw)));
        }
        Ok(Self {
            columns,
            values,
            format: Format::Binary,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Find a column by name, optionally qualified by table (alias or original name).
    pub fn index_of(&self, name: &str, table: Option<&str>) -> Option<usize> {
        self.columns.iter().position(|c| {
            c.name == name && table.is_none_or(|t| c.table == t || c.org_table == t)
        })
    }

    /// The value at `idx`; `None` if out of range.
    pub fn get(&self, idx: usize) -> Option<MySqlValue> {
        let column = self.columns.get(idx)?;
        Some(MySqlValue::new(
            column.column_type,
            self.format,
            column.is_unsigned(),
            self.values.get(idx)?.clone(),
        ))
    }

    /// The value of the first column named `name`.
    pub fn column(&self, name: &str) -> Option<MySqlValue> {
        self.get(self.index_of(name, None)?)
    }

    /// The value of column `name` from `table`.
    pub fn column_in(&self, name: &str, table: &str) -> Option<MySqlValue> {
        self.get(self.index_of(name, Some(table))?)
    }

    pub fn is_null(&self, idx: usize) -> bool {
        self.values.get(idx).is_none_or(Option::is_none)
    }

    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        self.get(idx)?.as_i64()
    }

    pub fn get_u64(&self, idx: usize) -> Option<u64> {
        self.get(idx)?.as_u64()
    }

    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        self.get(idx)?.as_f64()
    }

    pub fn get_bool(&self, idx: usize) -> Option<bool> {
        self.get(idx)?.as_bool()
    }

    /// Get a column value as String.
    /// Returns None if the value is NULL or not valid UTF-8 text.
    pub fn get_string(&self, idx: usize) -> Option<String> {
        self.get(idx)?.as_string()
    }
}
